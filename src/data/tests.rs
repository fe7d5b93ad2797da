use super::*;
use ndarray::{array, Array3, Array4};

fn table() -> Tabular {
    Tabular::from_columns(&[
        ("a", Dtype::Float, &[0.5, 1.5, 2.5, 3.5]),
        ("b", Dtype::Int, &[1.0, 2.0, 3.0, 4.0]),
        ("c", Dtype::Categorical, &[0.0, 1.0, 0.0, 2.0]),
    ])
    .expect("valid table")
}

#[test]
fn test_tabular_select_columns_and_samples() {
    let t = table();
    let cols = vec!["c".to_string(), "a".to_string()];
    let out = t.to_array(Some(&cols), Some(&[3, 1])).expect("selection should succeed");
    assert_eq!(out.shape(), &[2, 2]);
    assert_eq!(out[[0, 0]], 2.0);
    assert_eq!(out[[0, 1]], 3.5);
    assert_eq!(out[[1, 1]], 1.5);
}

#[test]
fn test_unknown_column_is_config_error() {
    let err = table().to_array(Some(&["zzz".to_string()]), None).unwrap_err();
    assert!(err.is_config_error());
}

#[test]
fn test_sample_out_of_range() {
    assert!(table().to_array(None, Some(&[4])).is_err());
}

#[test]
fn test_int_column_rejects_fraction() {
    let err = Tabular::from_columns(&[("b", Dtype::Int, &[1.0, 2.5])]).unwrap_err();
    assert!(err.to_string().contains("is int"));
}

#[test]
fn test_categorical_rejects_negative_codes() {
    assert!(Tabular::from_columns(&[("c", Dtype::Categorical, &[-1.0, 2.0])]).is_err());
}

#[test]
fn test_schema_rejects_duplicates() {
    let err = Schema::new(vec!["x".into(), "x".into()], vec![Dtype::Float, Dtype::Float]).unwrap_err();
    assert!(err.to_string().contains("duplicate"));
}

#[test]
fn test_sequence_counts_sequences() {
    let data = Array3::<f64>::zeros((5, 7, 2));
    let seq = Sequence::new(vec!["x".into(), "y".into()], vec![Dtype::Float; 2], data)
        .expect("valid sequence");
    let dataset = Dataset::from(seq);
    assert_eq!(dataset.kind(), DatasetKind::Sequence);
    assert_eq!(dataset.sample_count(), 5);

    let frame = dataset.to_frame(None, Some(&[0, 1])).expect("frame should build");
    assert_eq!(frame.values.dim(), (14, 2));
}

#[test]
fn test_image_shape_checked() {
    let data = Array4::<f64>::zeros((2, 1, 3, 3));
    assert!(Image::new(vec!["p".into()], vec![Dtype::Float], data).is_err());

    let data = Array4::<f64>::zeros((2, 1, 3, 1));
    let image = Image::new(vec!["p".into()], vec![Dtype::Float], data).expect("valid image");
    assert_eq!(Dataset::from(image).kind().ndim(), 4);
}

#[test]
fn test_frame_column_lookup() {
    let t = Tabular::new(
        vec!["x".into(), "y".into()],
        vec![Dtype::Float, Dtype::Float],
        array![[1.0, 2.0], [3.0, 4.0]],
    )
    .expect("valid table");
    let frame = t.to_frame(None, None).expect("frame should build");
    assert_eq!(frame.column("y").expect("column y").to_vec(), vec![2.0, 4.0]);
    assert!(frame.column("z").is_none());
}
