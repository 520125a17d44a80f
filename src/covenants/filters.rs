//! Covenant execution
//!
//! Every sub-expression sees the same immutable output set; operators combine
//! the index sets their operands return.

use crate::crypto::{DomainHasher, Hash};
use crate::transaction::TransactionOutput;

use super::{CovenantContext, CovenantError, CovenantExpr, OutputFields, OutputSet};

/// Hash compared by `FieldsHashedEq`
pub fn hash_fields(fields: &OutputFields, output: &TransactionOutput) -> Hash {
    DomainHasher::new("covenant.fields_hashed")
        .chain(fields.concat_bytes(output))
        .finalize()
}

impl CovenantExpr {
    pub fn execute(&self, context: &CovenantContext<'_>) -> Result<OutputSet, CovenantError> {
        let all = OutputSet::all(context.output_count());
        let set = match self {
            CovenantExpr::Identity => all,
            CovenantExpr::Empty => OutputSet::empty(),
            CovenantExpr::And(a, b) => a.execute(context)?.intersection(&b.execute(context)?),
            CovenantExpr::Or(a, b) => a.execute(context)?.union(&b.execute(context)?),
            CovenantExpr::Xor(a, b) => a.execute(context)?.symmetric_difference(&b.execute(context)?),
            CovenantExpr::Not(a) => a.execute(context)?.complement(context.output_count()),
            CovenantExpr::OutputHashEq(hash) => {
                all.filter(|i| context.outputs[i].hash() == *hash)
            }
            CovenantExpr::FieldsPreserved(fields) => {
                all.filter(|i| fields.is_eq(&context.outputs[i], context.input))
            }
            CovenantExpr::FieldIntEq(field, value) => {
                let mut filtered = Vec::new();
                for i in all.indices() {
                    let actual = field
                        .get_field_int(&context.outputs[i])
                        .ok_or(CovenantError::FieldNotInteger(*field))?;
                    if actual == *value {
                        filtered.push(i);
                    }
                }
                filtered.into_iter().collect()
            }
            CovenantExpr::FieldsHashedEq(fields, hash) => {
                all.filter(|i| hash_fields(fields, &context.outputs[i]) == *hash)
            }
            CovenantExpr::RelativeHeight(height) => {
                let unlock = context
                    .input_mined_height
                    .checked_add(*height)
                    .ok_or(CovenantError::HeightOverflow)?;
                if context.current_height < unlock {
                    OutputSet::empty()
                } else {
                    all
                }
            }
        };
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covenants::{Covenant, OutputField};
    use crate::crypto::SecretKey;
    use crate::transaction::{OutputFeatures, UnblindedOutput};

    fn output(value: u64, maturity: u64) -> TransactionOutput {
        let mut unblinded = UnblindedOutput::new(value, SecretKey::random());
        unblinded.features = OutputFeatures::with_maturity(maturity);
        unblinded.as_transaction_output(&SecretKey::random())
    }

    #[test]
    fn test_operators() {
        let input = output(10, 0);
        let outputs = vec![output(1, 0), output(2, 5), output(3, 7)];
        let ctx = CovenantContext::new(&input, &outputs, 0, 100);

        let mat5 = CovenantExpr::FieldIntEq(OutputField::FeaturesMaturity, 5);
        let mat0 = CovenantExpr::FieldIntEq(OutputField::FeaturesMaturity, 0);
        assert_eq!(mat5.execute(&ctx).unwrap(), [1].into_iter().collect());
        assert_eq!(
            CovenantExpr::not(mat5.clone()).execute(&ctx).unwrap(),
            [0, 2].into_iter().collect()
        );
        assert_eq!(
            CovenantExpr::or(mat5.clone(), mat0.clone()).execute(&ctx).unwrap(),
            [0, 1].into_iter().collect()
        );
        assert!(CovenantExpr::and(mat5.clone(), mat0).execute(&ctx).unwrap().is_empty());
        assert_eq!(
            CovenantExpr::xor(mat5, CovenantExpr::Identity).execute(&ctx).unwrap(),
            [0, 2].into_iter().collect()
        );
        assert!(CovenantExpr::Empty.execute(&ctx).unwrap().is_empty());
    }

    #[test]
    fn test_output_hash_eq() {
        let input = output(10, 0);
        let outputs = vec![output(1, 0), output(2, 0)];
        let ctx = CovenantContext::new(&input, &outputs, 0, 1);
        let expr = CovenantExpr::OutputHashEq(outputs[1].hash());
        assert_eq!(expr.execute(&ctx).unwrap(), [1].into_iter().collect());
    }

    #[test]
    fn test_fields_preserved() {
        let input = output(10, 0);
        let mut same_script = output(4, 0);
        same_script.script = input.script.clone();
        let outputs = vec![output(6, 0), same_script];
        let ctx = CovenantContext::new(&input, &outputs, 0, 1);
        let expr = CovenantExpr::FieldsPreserved(OutputFields::new(vec![OutputField::Script]));
        assert_eq!(expr.execute(&ctx).unwrap(), [1].into_iter().collect());
    }

    #[test]
    fn test_fields_hashed_eq() {
        let input = output(10, 0);
        let outputs = vec![output(6, 3)];
        let fields = OutputFields::new(vec![OutputField::FeaturesMaturity]);
        let hash = hash_fields(&fields, &outputs[0]);
        let ctx = CovenantContext::new(&input, &outputs, 0, 1);
        assert_eq!(
            CovenantExpr::FieldsHashedEq(fields, hash).execute(&ctx).unwrap(),
            OutputSet::all(1)
        );
    }

    #[test]
    fn test_int_eq_on_wide_field_fails() {
        let input = output(10, 0);
        let outputs = vec![output(6, 0)];
        let ctx = CovenantContext::new(&input, &outputs, 0, 1);
        let expr = CovenantExpr::FieldIntEq(OutputField::Commitment, 1);
        assert_eq!(
            expr.execute(&ctx),
            Err(CovenantError::FieldNotInteger(OutputField::Commitment))
        );
    }

    #[test]
    fn test_relative_height() {
        let input = output(10, 0);
        let outputs = vec![output(6, 0)];
        let expr = CovenantExpr::RelativeHeight(10);
        let early = CovenantContext::new(&input, &outputs, 100, 105);
        assert!(expr.execute(&early).unwrap().is_empty());
        let ready = CovenantContext::new(&input, &outputs, 100, 110);
        assert_eq!(expr.execute(&ready).unwrap(), OutputSet::all(1));
        assert!(Covenant::new(&expr).check(&early).is_err());
    }
}
