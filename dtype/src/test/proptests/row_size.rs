use proptest::prelude::*;
use strum::IntoEnumIterator;
use test_case::test_case;

use crate::DType;

proptest! {
    #[test]
    fn row_size_is_additive(dtype in super::generators::dtype_generator(), a in 0usize..64, b in 0usize..64) {
        let block = dtype.block_size();
        prop_assert_eq!(dtype.row_size((a + b) * block), dtype.row_size(a * block) + dtype.row_size(b * block));
    }

    #[test]
    fn plain_row_size_is_elementwise(dtype in super::generators::plain_dtype(), ne in 0usize..4096) {
        prop_assert_eq!(dtype.row_size(ne), ne * dtype.type_size());
    }

    #[test]
    fn quantized_blocks_are_smaller_than_f16(dtype in super::generators::quantized_dtype(), blocks in 1usize..128) {
        let ne = blocks * dtype.block_size();
        prop_assert!(dtype.row_size(ne) < DType::F16.row_size(ne));
    }
}

#[test_case(DType::F32, 4096 => 16384)]
#[test_case(DType::F16, 4096 => 8192)]
#[test_case(DType::Q4_0, 4096 => 2304)]
#[test_case(DType::Q8_0, 64 => 68)]
fn test_row_size(dtype: DType, ne: usize) -> usize {
    dtype.row_size(ne)
}

#[test]
#[should_panic(expected = "not a whole number")]
fn test_partial_block_panics() {
    DType::Q4_1.row_size(31);
}

#[test]
fn test_display_names() {
    let names: Vec<String> = DType::iter().map(|d| d.to_string()).collect();
    assert!(names.contains(&"f32".to_string()));
    assert!(names.contains(&"q4_0".to_string()));
}
