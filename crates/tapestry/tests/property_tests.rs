// Property tests: operand immutability, packed dtype storage, layout algebra

use proptest::prelude::*;
use tapestry::prelude::*;

fn values(len: usize) -> impl Strategy<Value = Vec<f64>> {
    // quarter steps are exact in every float dtype
    prop::collection::vec((-40i32..=40).prop_map(|v| v as f64 / 4.0), len)
}

proptest! {
    #[test]
    fn prop_public_ops_do_not_mutate_operands(
        (a, b) in (1usize..=8).prop_flat_map(|n| (values(n), values(n)))
    ) {
        let ctx = ExecutionContext::cpu();
        let n = a.len();
        let ta = ctx.tensor(&a, n).unwrap();
        let tb = ctx.tensor(&b, n).unwrap();

        let _ = ta.add(&tb).unwrap();
        let _ = ta.sub(&tb).unwrap();
        let _ = ta.mul(&tb).unwrap();
        let _ = ta.relu().unwrap();
        let _ = ta.sum(&[0], false).unwrap();
        let row = ta.reshape((1, n)).unwrap();
        let col = tb.reshape((n, 1)).unwrap();
        let _ = row.matmul(&col).unwrap();

        prop_assert_eq!(ta.to_f64_vec().unwrap(), a);
        prop_assert_eq!(tb.to_f64_vec().unwrap(), b);
    }

    #[test]
    fn prop_int4_round_trip(v in prop::collection::vec(-8i32..=7, 1..=17)) {
        let ctx = ExecutionContext::cpu();
        let values: Vec<f64> = v.iter().map(|&x| x as f64).collect();
        let t = ctx.tensor_with_dtype(&values, values.len(), DType::I4).unwrap();
        prop_assert_eq!(t.to_f64_vec().unwrap(), values);
    }

    #[test]
    fn prop_ternary_round_trip(v in prop::collection::vec(-1i32..=1, 1..=17)) {
        let ctx = ExecutionContext::cpu();
        let values: Vec<f64> = v.iter().map(|&x| x as f64).collect();
        let t = ctx.tensor_with_dtype(&values, values.len(), DType::Ternary).unwrap();
        prop_assert_eq!(t.to_f64_vec().unwrap(), values);
    }

    #[test]
    fn prop_double_transpose_is_identity(rows in 1usize..=5, cols in 1usize..=5) {
        let ctx = ExecutionContext::cpu();
        let values: Vec<f64> = (0..rows * cols).map(|v| v as f64).collect();
        let t = ctx.tensor(&values, (rows, cols)).unwrap();
        let tt = t.transpose(0, 1).unwrap();
        prop_assert_eq!(tt.dims(), &[cols, rows]);
        prop_assert_eq!(tt.transpose(0, 1).unwrap().to_f64_vec().unwrap(), values);
    }
}
