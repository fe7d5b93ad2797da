use super::*;
use crate::data::{Image, Sequence, Tabular};
use crate::pipeline::test_support::context;
use crate::pipeline::ColumnFilter;
use ndarray::{Array3, Array4};
use serde_json::Value;

fn register_table(ctx: &Context) -> i64 {
    let table = Tabular::from_columns(&[
        ("a", Dtype::Float, &[0.5, 1.5, 2.5, 3.5, 4.5, 5.5]),
        ("b", Dtype::Int, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        ("c", Dtype::Categorical, &[0.0, 1.0, 0.0, 2.0, 1.0, 2.0]),
        ("y", Dtype::Int, &[0.0, 1.0, 0.0, 1.0, 0.0, 1.0]),
    ])
    .expect("valid table");
    ctx.register_dataset(table).expect("dataset registers")
}

fn names(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

#[test]
fn test_feature_defaults_to_every_column() {
    let ctx = context(0);
    let dataset_id = register_table(&ctx);
    let feature = Feature::create(&ctx, dataset_id, None, None).expect("feature");
    assert_eq!(feature.columns, names(&["a", "b", "c", "y"]));
    assert_eq!(feature.kind, DatasetKind::Tabular);
    assert_eq!(feature.sample_count(&ctx).expect("count"), 6);
}

#[test]
fn test_feature_exclude_keeps_schema_order() {
    let ctx = context(0);
    let dataset_id = register_table(&ctx);
    let feature = Feature::create(&ctx, dataset_id, None, Some(names(&["y", "b"]))).expect("feature");
    assert_eq!(feature.columns, names(&["a", "c"]));
    assert_eq!(feature.dtypes, vec![Dtype::Float, Dtype::Categorical]);
}

#[test]
fn test_feature_include_keeps_given_order() {
    let ctx = context(0);
    let dataset_id = register_table(&ctx);
    let feature = Feature::create(&ctx, dataset_id, Some(names(&["c", "a"])), None).expect("feature");
    let values = feature.to_array(&ctx, Some(&[3])).expect("array");
    assert_eq!(values.shape(), &[1, 2]);
    assert_eq!(values[[0, 0]], 2.0);
    assert_eq!(values[[0, 1]], 3.5);
}

#[test]
fn test_feature_rejects_bad_column_selections() {
    let ctx = context(0);
    let dataset_id = register_table(&ctx);

    let both = Feature::create(&ctx, dataset_id, Some(names(&["a"])), Some(names(&["b"]))).unwrap_err();
    assert!(both.is_config_error());
    let unknown = Feature::create(&ctx, dataset_id, Some(names(&["zzz"])), None).unwrap_err();
    assert!(unknown.is_config_error());
    let empty = Feature::create(&ctx, dataset_id, None, Some(names(&["a", "b", "c", "y"]))).unwrap_err();
    assert!(empty.to_string().contains("empty"));
    assert_eq!(ctx.store().count::<Feature>(&[]).expect("count"), 0);
}

#[test]
fn test_duplicate_feature_is_rejected() {
    let ctx = context(0);
    let dataset_id = register_table(&ctx);
    let first = Feature::create(&ctx, dataset_id, Some(names(&["a"])), None).expect("feature");
    let err = Feature::create(&ctx, dataset_id, Some(names(&["a"])), None).unwrap_err();
    assert!(err.to_string().contains(&format!("feature {}", first.id)));
}

#[test]
fn test_encoded_column_names_follow_coders_then_leftovers() {
    let ctx = context(0);
    let dataset_id = register_table(&ctx);
    let feature = Feature::create(&ctx, dataset_id, None, Some(names(&["y"]))).expect("feature");
    assert_eq!(feature.encoded_column_names(&ctx).expect("names"), names(&["a", "b", "c"]));

    let encoderset = Encoderset::create(&ctx, feature.id, None).expect("encoderset");
    FeatureCoder::create(&ctx, encoderset.id, "one_hot", Value::Null, ColumnFilter::include_columns(["c"]))
        .expect("coder");
    assert_eq!(
        feature.encoded_column_names(&ctx).expect("names"),
        names(&["c=0", "c=1", "c=2", "a", "b"])
    );
}

#[test]
fn test_windowed_feature_counts_windows() {
    let ctx = context(0);
    let dataset_id = register_table(&ctx);
    let feature = Feature::create(&ctx, dataset_id, Some(names(&["a"])), None).expect("feature");
    let window = Window::create(&ctx, feature.id, 2, 2, false).expect("window");
    assert_eq!(feature.window(&ctx).expect("lookup"), Some(window.clone()));
    assert_eq!(feature.sample_count(&ctx).expect("count"), window.window_count);
}

#[test]
fn test_sequence_and_image_features() {
    let ctx = context(0);
    let seq = Sequence::new(names(&["x", "z"]), vec![Dtype::Float; 2], Array3::zeros((4, 5, 2)))
        .expect("sequence");
    let seq_id = ctx.register_dataset(seq).expect("dataset");
    let feature = Feature::create(&ctx, seq_id, Some(names(&["z"])), None).expect("feature");
    assert_eq!(feature.kind, DatasetKind::Sequence);
    assert_eq!(feature.to_array(&ctx, None).expect("array").shape(), &[4, 5, 1]);

    let image = Image::new(names(&["r", "g"]), vec![Dtype::Float; 2], Array4::zeros((3, 1, 4, 2)))
        .expect("image");
    let image_id = ctx.register_dataset(image).expect("dataset");
    let feature = Feature::create(&ctx, image_id, None, None).expect("feature");
    assert_eq!(feature.kind, DatasetKind::Image);
    assert_eq!(feature.sample_count(&ctx).expect("count"), 3);
}

#[test]
fn test_label_single_column_records_classes() {
    let ctx = context(0);
    let dataset_id = register_table(&ctx);
    let label = Label::create(&ctx, dataset_id, names(&["c"])).expect("label");
    assert_eq!(label.unique_classes, Some(vec![0.0, 1.0, 2.0]));
    assert!(!label.one_hot);

    let float = Label::create(&ctx, dataset_id, names(&["a"])).expect("label");
    assert_eq!(float.unique_classes, None);
}

#[test]
fn test_label_multi_column_must_be_one_hot() {
    let ctx = context(0);
    let table = Tabular::from_columns(&[
        ("p", Dtype::Int, &[1.0, 0.0, 0.0]),
        ("q", Dtype::Int, &[0.0, 1.0, 1.0]),
        ("r", Dtype::Int, &[0.0, 1.0, 0.0]),
    ])
    .expect("valid table");
    let dataset_id = ctx.register_dataset(table).expect("dataset");

    let label = Label::create(&ctx, dataset_id, names(&["p", "q"])).expect("one-hot label");
    assert!(label.one_hot);
    let err = Label::create(&ctx, dataset_id, names(&["p", "q", "r"])).unwrap_err();
    assert!(err.to_string().contains("2 hot columns"));
}

#[test]
fn test_label_rejects_non_tabular_and_duplicates() {
    let ctx = context(0);
    let seq = Sequence::new(names(&["x"]), vec![Dtype::Float], Array3::zeros((2, 3, 1))).expect("sequence");
    let seq_id = ctx.register_dataset(seq).expect("dataset");
    assert!(Label::create(&ctx, seq_id, names(&["x"])).unwrap_err().is_config_error());

    let dataset_id = register_table(&ctx);
    assert!(Label::create(&ctx, dataset_id, Vec::new()).is_err());
    Label::create(&ctx, dataset_id, names(&["y"])).expect("label");
    assert!(Label::create(&ctx, dataset_id, names(&["y"])).unwrap_err().to_string().contains("already exists"));
}
