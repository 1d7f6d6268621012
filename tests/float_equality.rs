use bitpart::{Config, Predicate};
use test_log::test;

#[test]
fn non_representable_float_equality_is_empty() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let mut writer = bitpart::PartitionWriter::create(&folder, "float_eq")?;
    writer.column_f32("f", &[1.0, 2.0, 3.0])?;
    writer.finish()?;

    let part = Config::new(&folder).open()?;

    // 2.0000001 does not survive the f32 roundtrip, so no stored value
    // can equal it
    let pred = Predicate::range("f").equals(2.000_000_1);
    assert_eq!(0, part.count_hits(&pred)?);

    let pred = Predicate::range("f").equals(2.0);
    assert_eq!(vec![1], part.evaluate(&pred)?.ones().collect::<Vec<_>>());

    Ok(())
}

#[test]
fn double_column_compares_exactly() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let mut writer = bitpart::PartitionWriter::create(&folder, "double_eq")?;
    writer.column_f64("d", &[1.0, 2.000_000_1, 3.0])?;
    writer.finish()?;

    let part = Config::new(&folder).open()?;

    let pred = Predicate::range("d").equals(2.000_000_1);
    assert_eq!(vec![1], part.evaluate(&pred)?.ones().collect::<Vec<_>>());

    Ok(())
}

#[test]
fn float_range_strictness() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let mut writer = bitpart::PartitionWriter::create(&folder, "float_range")?;
    writer.column_f64("d", &[0.5, 1.0, 1.5, 2.0])?;
    writer.finish()?;

    let part = Config::new(&folder).open()?;

    let hits = part.evaluate(&Predicate::range("d").less_than(1.5))?;
    assert_eq!(vec![0, 1], hits.ones().collect::<Vec<_>>());

    let hits = part.evaluate(&Predicate::range("d").at_most(1.5))?;
    assert_eq!(vec![0, 1, 2], hits.ones().collect::<Vec<_>>());

    Ok(())
}
