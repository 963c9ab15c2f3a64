use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use ndarray::{ArrayD, Dimension, IxDyn};
use serde_json::{Value, json};

use n5_denoise::domain::{Compression, DataType, SetupId};
use n5_denoise::error::DenoiseError;
use n5_denoise::store::{ChunkedStore, DatasetAttributes, N5Store, OpenMode, list_setups};

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().join("volume.n5")).unwrap();
    (dir, root)
}

fn gzip() -> Compression {
    Compression::Gzip {
        level: -1,
        use_zlib: false,
    }
}

fn ramp(shape: &[usize]) -> ArrayD<f64> {
    ArrayD::from_shape_fn(IxDyn(shape), |idx| {
        (0..idx.ndim()).fold(0.0, |acc, axis| acc * 10.0 + idx[axis] as f64)
    })
}

#[test]
fn write_then_read_with_edge_blocks() {
    let (_dir, root) = temp_root();
    let store = N5Store::open(root.clone(), OpenMode::Append).unwrap();
    let attrs = DatasetAttributes {
        shape: vec![5, 7, 3],
        chunks: vec![2, 3, 2],
        data_type: DataType::Uint16,
        compression: gzip(),
    };
    let data = ramp(&attrs.shape);
    store.create_dataset("raw", &attrs).unwrap();
    store.write("raw", data.view(), 3).unwrap();

    assert_eq!(store.dataset("raw").unwrap(), attrs);
    assert_eq!(store.read("raw").unwrap(), data);

    // Blocks are addressed fastest axis first.
    assert!(root.join("raw/1/0/0").as_std_path().is_file());
    assert!(root.join("raw/0/2/2").as_std_path().is_file());
    assert!(!root.join("raw/0/0/3").as_std_path().exists());
}

#[test]
fn region_read_spans_blocks() {
    let (_dir, root) = temp_root();
    let store = N5Store::open(root, OpenMode::Append).unwrap();
    let attrs = DatasetAttributes {
        shape: vec![6, 6, 6],
        chunks: vec![4, 4, 4],
        data_type: DataType::Float32,
        compression: Compression::Raw,
    };
    let data = ramp(&attrs.shape);
    store.create_dataset("a/b", &attrs).unwrap();
    store.write("a/b", data.view(), 1).unwrap();

    let region = store.read_region("a/b", &[1..4, 2..6, 3..5]).unwrap();
    let expected = ArrayD::from_shape_fn(IxDyn(&[3, 4, 2]), |idx| {
        data[[idx[0] + 1, idx[1] + 2, idx[2] + 3]]
    });
    assert_eq!(region, expected);
}

#[test]
fn signed_and_float_samples_survive() {
    let (_dir, root) = temp_root();
    let store = N5Store::open(root, OpenMode::Append).unwrap();
    for (key, data_type, values) in [
        ("int8", DataType::Int8, vec![-128.0, -1.0, 0.0, 127.0]),
        ("int32", DataType::Int32, vec![-5.0, 4.0, 2.0e9, -2.0e9]),
        ("float64", DataType::Float64, vec![0.125, -3.5, 1e-9, 7.0]),
    ] {
        let attrs = DatasetAttributes {
            shape: vec![2, 2],
            chunks: vec![1, 2],
            data_type,
            compression: Compression::Gzip {
                level: 6,
                use_zlib: true,
            },
        };
        let data = ArrayD::from_shape_vec(IxDyn(&[2, 2]), values).unwrap();
        store.create_dataset(key, &attrs).unwrap();
        store.write(key, data.view(), 2).unwrap();
        assert_eq!(store.read(key).unwrap(), data, "{key}");
    }
}

#[test]
fn every_n5_codec_round_trips() {
    let (_dir, root) = temp_root();
    let store = N5Store::open(root.clone(), OpenMode::Append).unwrap();
    let codecs = [
        ("bzip2", Compression::Bzip2 { block_size: 9 }, &b"BZh"[..]),
        ("xz", Compression::Xz { preset: 6 }, &[0xFD, b'7', b'z', b'X', b'Z'][..]),
        ("lz4", Compression::Lz4 { block_size: 65536 }, &b"LZ4Block"[..]),
    ];
    for (key, compression, magic) in codecs {
        let attrs = DatasetAttributes {
            shape: vec![6, 5, 9],
            chunks: vec![4, 4, 4],
            data_type: DataType::Uint16,
            compression,
        };
        let data = ramp(&attrs.shape);
        store.create_dataset(key, &attrs).unwrap();
        store.write(key, data.view(), 3).unwrap();
        assert_eq!(store.read(key).unwrap(), data, "{key}");

        let text = std::fs::read_to_string(root.join(key).join("attributes.json")).unwrap();
        let stored: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(stored["compression"]["type"], key);

        // Payload follows the mode, rank and three block sizes.
        let block = std::fs::read(root.join(key).join("0/0/0")).unwrap();
        assert!(block[16..].starts_with(magic), "{key}");
    }
}

#[test]
fn sixty_four_bit_integer_datasets_are_rejected() {
    let (_dir, root) = temp_root();
    let store = N5Store::open(root.clone(), OpenMode::Append).unwrap();
    std::fs::create_dir_all(root.join("wide")).unwrap();
    let attrs = json!({
        "dimensions": [4, 4],
        "blockSize": [2, 2],
        "dataType": "uint64",
        "compression": {"type": "raw"}
    });
    std::fs::write(root.join("wide/attributes.json"), attrs.to_string()).unwrap();

    assert_matches!(
        store.dataset("wide"),
        Err(DenoiseError::UnsupportedDataType(name)) if name == "uint64"
    );
    assert_matches!(store.read("wide"), Err(DenoiseError::UnsupportedDataType(_)));
}

#[test]
fn unwritten_blocks_read_as_zero() {
    let (_dir, root) = temp_root();
    let store = N5Store::open(root, OpenMode::Append).unwrap();
    let attrs = DatasetAttributes {
        shape: vec![4, 4],
        chunks: vec![2, 2],
        data_type: DataType::Uint8,
        compression: Compression::Raw,
    };
    store.create_dataset("empty", &attrs).unwrap();
    let data = store.read("empty").unwrap();
    assert!(data.iter().all(|value| *value == 0.0));
}

#[test]
fn dataset_attributes_are_stored_reversed() {
    let (_dir, root) = temp_root();
    let store = N5Store::open(root.clone(), OpenMode::Append).unwrap();
    let attrs = DatasetAttributes {
        shape: vec![10, 20, 30],
        chunks: vec![1, 2, 3],
        data_type: DataType::Uint16,
        compression: gzip(),
    };
    store.create_dataset("s0", &attrs).unwrap();

    let text = std::fs::read_to_string(root.join("s0/attributes.json")).unwrap();
    let stored: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(stored["dimensions"], json!([30, 20, 10]));
    assert_eq!(stored["blockSize"], json!([3, 2, 1]));
    assert_eq!(stored["dataType"], json!("uint16"));
    assert_eq!(stored["compression"]["type"], json!("gzip"));

    let root_attrs = std::fs::read_to_string(root.join("attributes.json")).unwrap();
    assert!(root_attrs.contains("\"n5\""));
}

#[test]
fn creating_twice_is_rejected() {
    let (_dir, root) = temp_root();
    let store = N5Store::open(root, OpenMode::Append).unwrap();
    let attrs = DatasetAttributes {
        shape: vec![2],
        chunks: vec![2],
        data_type: DataType::Uint8,
        compression: Compression::Raw,
    };
    store.create_dataset("d", &attrs).unwrap();
    assert_matches!(
        store.create_dataset("d", &attrs),
        Err(DenoiseError::DatasetExists(key)) if key == "d"
    );
}

#[test]
fn read_only_store_refuses_writes() {
    let (_dir, root) = temp_root();
    N5Store::open(root.clone(), OpenMode::Append).unwrap();
    let store = N5Store::open(root, OpenMode::Read).unwrap();
    let attrs = DatasetAttributes {
        shape: vec![2],
        chunks: vec![2],
        data_type: DataType::Uint8,
        compression: Compression::Raw,
    };
    assert_matches!(store.create_dataset("d", &attrs), Err(DenoiseError::ReadOnly(_)));
}

#[test]
fn open_for_read_requires_directory() {
    let (_dir, root) = temp_root();
    assert_matches!(
        N5Store::open(root, OpenMode::Read),
        Err(DenoiseError::MissingPath(_))
    );
}

#[test]
fn write_rejects_wrong_shape() {
    let (_dir, root) = temp_root();
    let store = N5Store::open(root, OpenMode::Append).unwrap();
    let attrs = DatasetAttributes {
        shape: vec![3, 3],
        chunks: vec![2, 2],
        data_type: DataType::Float32,
        compression: Compression::Raw,
    };
    store.create_dataset("d", &attrs).unwrap();
    let data = ArrayD::<f64>::zeros(IxDyn(&[3, 4]));
    assert_matches!(
        store.write("d", data.view(), 1),
        Err(DenoiseError::ShapeMismatch { .. })
    );
}

#[test]
fn region_out_of_bounds_is_rejected() {
    let (_dir, root) = temp_root();
    let store = N5Store::open(root, OpenMode::Append).unwrap();
    let attrs = DatasetAttributes {
        shape: vec![4, 4],
        chunks: vec![2, 2],
        data_type: DataType::Uint8,
        compression: Compression::Raw,
    };
    store.create_dataset("d", &attrs).unwrap();
    assert_matches!(
        store.read_region("d", &[0..2, 3..5]),
        Err(DenoiseError::RegionOutOfBounds { .. })
    );
}

#[test]
fn attributes_merge_key_by_key() {
    let (_dir, root) = temp_root();
    let store = N5Store::open(root, OpenMode::Append).unwrap();
    let first = json!({"unit": "um", "nested": {"a": [1, 2]}});
    let second = json!({"unit": "nm", "extra": null});
    store
        .set_attributes("setup0", first.as_object().unwrap())
        .unwrap();
    store
        .set_attributes("setup0", second.as_object().unwrap())
        .unwrap();

    let merged = store.attributes("setup0").unwrap();
    assert_eq!(
        Value::Object(merged),
        json!({"unit": "nm", "nested": {"a": [1, 2]}, "extra": null})
    );
}

#[test]
fn setups_are_listed_numerically() {
    let (_dir, root) = temp_root();
    let store = N5Store::open(root, OpenMode::Append).unwrap();
    let empty = serde_json::Map::new();
    for group in ["setup10", "setup2", "setup0", "metadata"] {
        store.set_attributes(group, &empty).unwrap();
    }
    assert_eq!(
        list_setups(&store).unwrap(),
        vec![SetupId::new(0), SetupId::new(2), SetupId::new(10)]
    );
}

#[test]
fn keys_cannot_escape_the_container() {
    let (_dir, root) = temp_root();
    let store = N5Store::open(root, OpenMode::Append).unwrap();
    assert_matches!(store.list("../elsewhere"), Err(DenoiseError::InvalidKey(_)));
}
