use bitpart::{ColumnType, Config, MeshShape, PartitionState};
use test_log::test;

#[test]
fn header_survives_rewrite_and_reopen() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let mut writer = bitpart::PartitionWriter::create(&folder, "roundtrip")?;
    writer.description("header roundtrip fixture");
    writer.meta_tag("origin", "test");
    writer.meta_tag("version", "1");
    writer.mesh_shape(MeshShape {
        dims: vec![(Some("x".into()), 2), (Some("y".into()), 3)],
    });
    writer.column_i32("a", &[1, 2, 3, 4, 5, 6])?;
    writer.column_f64("b", &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6])?;
    writer.category("c", &["u", "v", "u", "v", "u", "v"])?;
    writer.finish()?;

    let (name, switch_time) = {
        let part = Config::new(&folder).open()?;

        assert_eq!(6, part.row_count());
        assert_eq!(PartitionState::Stable, part.state());
        assert_eq!("header roundtrip fixture", part.description());

        // force a rewrite through the dirty path
        part.add_meta_tag("extra", "tag");
        assert!(part.flush()?);

        (part.name(), part.switch_time())
    };

    let part = Config::new(&folder).open()?;

    assert_eq!(name, part.name());
    assert_eq!(switch_time, part.switch_time());
    assert_eq!(6, part.row_count());
    assert_eq!(vec!["a", "b", "c"], part.column_names());
    assert_eq!(Some(ColumnType::Int), part.column_type("a"));
    assert_eq!(Some(ColumnType::Double), part.column_type("b"));
    assert_eq!(Some(ColumnType::Category), part.column_type("c"));

    let tags = part.meta_tags();
    assert_eq!(3, tags.len());
    assert_eq!("extra", tags[2].name);

    let shape = part.mesh_shape().expect("shape persisted");
    assert_eq!(2, shape.dims.len());

    Ok(())
}

#[test]
fn missing_header_fails_the_constructor() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    assert!(matches!(
        Config::new(&folder).open(),
        Err(bitpart::Error::MetadataMissing),
    ));

    Ok(())
}

#[test]
fn missing_directory_fails_the_constructor() {
    assert!(Config::new("/nonexistent/bitpart/dir").open().is_err());
}

#[test]
fn positional_column_lookup() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let mut writer = bitpart::PartitionWriter::create(&folder, "positional")?;
    writer.column_i32("first", &[1])?;
    writer.column_i32("second", &[2])?;
    writer.finish()?;

    let part = Config::new(&folder).open()?;

    // a leading underscore addresses columns by hex position
    assert_eq!(Some(ColumnType::Int), part.column_type("_0"));
    assert_eq!(Some(ColumnType::Int), part.column_type("_1"));
    assert_eq!(None, part.column_type("_2"));

    Ok(())
}
