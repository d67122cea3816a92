use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::Int64Type;
use arrow_array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array,
    Int16Array, Int32Array, Int64Array, StringArray, Time32MillisecondArray,
    TimestampMillisecondArray, UInt64Array,
};
use arrow_schema::DataType;
use ogrio::errors::OgrioError;
use ogrio::read::{read_arrays, ReadOptions};
use ogrio::schema::{read_info, InfoOptions};
use ogrio::{write_arrays, ColumnarBatch, GeometryType, WriteMode, WriteOptions};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

fn regions() -> ColumnarBatch {
    read_arrays(fixture("regions.geojson"), &ReadOptions::default())
        .unwrap()
        .batch
}

#[test]
fn test_gpkg_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("regions.gpkg");
    let source = regions();
    let options = WriteOptions {
        crs: Some("EPSG:4326".to_string()),
        geometry_type: Some(GeometryType::POLYGON),
        ..Default::default()
    };
    let summary = write_arrays(&path, &source, &options).unwrap();
    assert_eq!(summary.rows_written, 5);
    assert_eq!(summary.layer, "regions");
    assert_eq!(summary.driver, "GPKG");

    let info = read_info(&path, &InfoOptions::default()).unwrap();
    assert_eq!(info.driver, "GPKG");
    assert_eq!(info.schema.geometry_type, GeometryType::POLYGON);
    assert_eq!(info.schema.crs.as_deref(), Some("EPSG:4326"));

    let result = read_arrays(&path, &ReadOptions::default()).unwrap();
    assert_eq!(result.batch.num_rows(), 5);
    for (name, column) in source.columns() {
        assert_eq!(result.batch.column(name).unwrap(), column, "column {name}");
    }
    assert_eq!(result.batch.geometry(), source.geometry());
}

#[test]
fn test_typed_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("typed.gpkg");
    let columns: Vec<(String, ArrayRef)> = vec![
        (
            "flag".to_string(),
            Arc::new(BooleanArray::from(vec![Some(true), None, Some(false)])),
        ),
        (
            "small".to_string(),
            Arc::new(Int16Array::from(vec![Some(-7), Some(300), None])),
        ),
        (
            "count".to_string(),
            Arc::new(Int32Array::from(vec![None, Some(1), Some(i32::MAX)])),
        ),
        (
            "big".to_string(),
            Arc::new(Int64Array::from(vec![Some(i64::MIN + 1), None, Some(1 << 40)])),
        ),
        (
            "ratio".to_string(),
            Arc::new(Float32Array::from(vec![Some(0.5), Some(-1.25), None])),
        ),
        (
            "value".to_string(),
            Arc::new(Float64Array::from(vec![None, Some(1e-9), Some(12345.678)])),
        ),
        (
            "label".to_string(),
            Arc::new(StringArray::from(vec![Some("é ü"), Some(""), None])),
        ),
        (
            "blob".to_string(),
            Arc::new(BinaryArray::from(vec![
                Some(&[0u8, 1, 255][..]),
                None,
                Some(&[42u8][..]),
            ])),
        ),
        (
            "day".to_string(),
            Arc::new(Date32Array::from(vec![Some(19_000), Some(-1), None])),
        ),
        (
            "stamp".to_string(),
            Arc::new(TimestampMillisecondArray::from(vec![
                Some(1_592_215_200_123),
                None,
                Some(-86_400_000),
            ])),
        ),
    ];
    let source = ColumnarBatch::try_new(columns, None).unwrap();
    write_arrays(&path, &source, &WriteOptions::default()).unwrap();

    let info = read_info(&path, &InfoOptions::default()).unwrap();
    assert_eq!(info.schema.geometry_type, GeometryType::NONE);
    let result = read_arrays(&path, &ReadOptions::default()).unwrap();
    assert!(result.batch.geometry().is_none());
    for (name, column) in source.columns() {
        let read = result.batch.column(name).unwrap();
        assert_eq!(read.data_type(), column.data_type(), "column {name}");
        assert_eq!(read, column, "column {name}");
    }
}

#[test]
fn test_unsupported_types_rejected_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rejected.gpkg");

    let times: ArrayRef = Arc::new(Time32MillisecondArray::from(vec![1_000]));
    let batch = ColumnarBatch::try_new(vec![("at".to_string(), times)], None).unwrap();
    let err = write_arrays(&path, &batch, &WriteOptions::default()).unwrap_err();
    assert!(
        matches!(&err, OgrioError::UnsupportedFieldType { field, .. } if field == "at"),
        "{err:?}"
    );

    let ids: ArrayRef = Arc::new(UInt64Array::from(vec![u64::MAX]));
    let batch = ColumnarBatch::try_new(vec![("id".to_string(), ids)], None).unwrap();
    let err = write_arrays(&path, &batch, &WriteOptions::default()).unwrap_err();
    assert!(matches!(err, OgrioError::UnsupportedFieldType { .. }), "{err:?}");

    assert!(!path.exists());
}

#[test]
fn test_small_transactions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batched.gpkg");
    let options = WriteOptions {
        batch_size: 2,
        ..Default::default()
    };
    let summary = write_arrays(&path, &regions(), &options).unwrap();
    assert_eq!(summary.rows_written, 5);
    let result = read_arrays(&path, &ReadOptions::default()).unwrap();
    assert_eq!(result.batch.num_rows(), 5);
}

#[test]
fn test_append_and_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("regions.gpkg");
    write_arrays(&path, &regions(), &WriteOptions::default()).unwrap();

    let append = WriteOptions {
        mode: WriteMode::Append,
        ..Default::default()
    };
    write_arrays(&path, &regions(), &append).unwrap();
    let result = read_arrays(&path, &ReadOptions::default()).unwrap();
    assert_eq!(result.batch.num_rows(), 10);

    let pop: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), Some(2)]));
    let small = ColumnarBatch::try_new(vec![("pop".to_string(), pop)], None).unwrap();
    let overwrite = WriteOptions {
        mode: WriteMode::Overwrite,
        ..Default::default()
    };
    write_arrays(&path, &small, &overwrite).unwrap();
    let result = read_arrays(&path, &ReadOptions::default()).unwrap();
    assert_eq!(result.batch.num_rows(), 2);
    assert_eq!(result.batch.column_names().collect::<Vec<_>>(), vec!["pop"]);
    assert!(result.batch.geometry().is_none());
}

#[test]
fn test_append_adds_missing_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grow.gpkg");
    let first: ArrayRef = Arc::new(Int64Array::from(vec![1]));
    let batch = ColumnarBatch::try_new(vec![("a".to_string(), first)], None).unwrap();
    write_arrays(&path, &batch, &WriteOptions::default()).unwrap();

    let a: ArrayRef = Arc::new(Int64Array::from(vec![2]));
    let b: ArrayRef = Arc::new(StringArray::from(vec!["two"]));
    let batch =
        ColumnarBatch::try_new(vec![("b".to_string(), b), ("a".to_string(), a)], None).unwrap();
    let append = WriteOptions {
        mode: WriteMode::Append,
        ..Default::default()
    };
    write_arrays(&path, &batch, &append).unwrap();

    let result = read_arrays(&path, &ReadOptions::default()).unwrap();
    assert_eq!(result.batch.column_names().collect::<Vec<_>>(), vec!["a", "b"]);
    let a = result.batch.column("a").unwrap().as_primitive::<Int64Type>();
    assert_eq!(a.values().to_vec(), vec![1, 2]);
    let b = result.batch.column("b").unwrap().as_string::<i32>();
    assert!(b.is_null(0));
    assert_eq!(b.value(1), "two");
}

#[test]
fn test_shapefile_laundered_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("laundered.shp");
    let source = regions();
    let values: ArrayRef =
        Arc::new(Int64Array::from(vec![Some(10), None, Some(30), Some(40), Some(50)]));
    let batch = ColumnarBatch::try_new(
        vec![("population_total".to_string(), values)],
        source.geometry().cloned(),
    )
    .unwrap();
    let options = WriteOptions {
        geometry_type: Some(GeometryType::POLYGON),
        ..Default::default()
    };
    let summary = write_arrays(&path, &batch, &options).unwrap();
    assert_eq!(summary.driver, "ESRI Shapefile");
    assert!(!summary.warnings.is_empty());

    let result = read_arrays(&path, &ReadOptions::default()).unwrap();
    assert_eq!(result.batch.num_rows(), 5);
    let column = result.batch.column("population").unwrap();
    assert_eq!(column.data_type(), &DataType::Int64);
    let column = column.as_primitive::<Int64Type>();
    assert_eq!(column.value(0), 10);
    assert_eq!(column.value(4), 50);
}

#[test]
fn test_mode_create_requires_new_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("regions.gpkg");
    write_arrays(&path, &regions(), &WriteOptions::default()).unwrap();
    assert!(matches!(
        write_arrays(&path, &regions(), &WriteOptions::default()),
        Err(OgrioError::BadArgument(_))
    ));
}

fn point_wkb(x: f64, y: f64) -> Vec<u8> {
    let mut wkb = vec![1u8, 1, 0, 0, 0];
    wkb.extend_from_slice(&x.to_le_bytes());
    wkb.extend_from_slice(&y.to_le_bytes());
    wkb
}

#[test]
fn test_append_rejects_mismatched_type() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("typed.gpkg");
    let a: ArrayRef = Arc::new(Int64Array::from(vec![1, 2]));
    let batch = ColumnarBatch::try_new(vec![("a".to_string(), a)], None).unwrap();
    write_arrays(&path, &batch, &WriteOptions::default()).unwrap();

    let append = WriteOptions {
        mode: WriteMode::Append,
        ..Default::default()
    };
    let text: ArrayRef = Arc::new(StringArray::from(vec!["three"]));
    let batch = ColumnarBatch::try_new(vec![("a".to_string(), text)], None).unwrap();
    let err = write_arrays(&path, &batch, &append).unwrap_err();
    assert!(
        matches!(&err, OgrioError::UnsupportedFieldType { field, .. } if field == "a"),
        "{err:?}"
    );

    // Integer widens into Integer64.
    let small: ArrayRef = Arc::new(Int32Array::from(vec![3]));
    let batch = ColumnarBatch::try_new(vec![("a".to_string(), small)], None).unwrap();
    write_arrays(&path, &batch, &append).unwrap();

    let result = read_arrays(&path, &ReadOptions::default()).unwrap();
    let a = result.batch.column("a").unwrap().as_primitive::<Int64Type>();
    assert_eq!(a.values().to_vec(), vec![1, 2, 3]);
}

#[test]
fn test_failed_row_rolls_back_its_batch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.gpkg");
    let ids: ArrayRef = Arc::new(Int64Array::from(vec![0, 1, 2, 3, 4]));
    let mut wkbs: Vec<Vec<u8>> = (0..5).map(|i| point_wkb(i as f64, 0.0)).collect();
    // Truncated point
    wkbs[2].truncate(9);
    let geometry = BinaryArray::from_iter_values(wkbs.iter());
    let batch = ColumnarBatch::try_new(vec![("id".to_string(), ids)], Some(geometry)).unwrap();
    let options = WriteOptions {
        geometry_type: Some(GeometryType::POINT),
        batch_size: 2,
        ..Default::default()
    };

    let err = write_arrays(&path, &batch, &options).unwrap_err();
    assert!(matches!(err, OgrioError::WriteError { row: 2, .. }), "{err:?}");

    let result = read_arrays(&path, &ReadOptions::default()).unwrap();
    let ids = result.batch.column("id").unwrap().as_primitive::<Int64Type>();
    assert_eq!(ids.values().to_vec(), vec![0, 1]);
}
