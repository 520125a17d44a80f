use crate::transaction::TransactionOutput;

/// Everything a covenant can observe while it is evaluated for one input
#[derive(Debug, Clone, Copy)]
pub struct CovenantContext<'a> {
    /// The output being spent, as found in the UTXO set
    pub input: &'a TransactionOutput,
    /// Outputs of the spending transaction (or block body)
    pub outputs: &'a [TransactionOutput],
    /// Height at which the spent output was mined
    pub input_mined_height: u64,
    /// Height of the block the spend is (or would be) included in
    pub current_height: u64,
}

impl<'a> CovenantContext<'a> {
    pub fn new(
        input: &'a TransactionOutput,
        outputs: &'a [TransactionOutput],
        input_mined_height: u64,
        current_height: u64,
    ) -> Self {
        Self {
            input,
            outputs,
            input_mined_height,
            current_height,
        }
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }
}
