use bitpart::{Config, Rid};
use test_log::test;

#[test]
fn lookup_after_sort() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let mut writer = bitpart::PartitionWriter::create(&folder, "rids")?;
    writer.column_i32("x", &[1, 2, 3, 4])?;
    writer.rids(&[Rid(100), Rid(200), Rid(300), Rid(400)])?;
    writer.finish()?;

    let part = Config::new(&folder).open()?;

    assert_eq!(Some(2), part.row_from_rid(Rid(300))?);
    assert_eq!(None, part.row_from_rid(Rid(999))?);

    // the sorted companion was persisted
    assert!(folder.path().join("-rids.srt").exists());

    Ok(())
}

#[test]
fn roundtrip_is_identity_on_active_rows() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let rids: Vec<Rid> = (0..64u64).map(|i| Rid(10_000 - i * 7)).collect();

    let mut writer = bitpart::PartitionWriter::create(&folder, "rids_identity")?;
    writer.column_u32("x", &(0..64).collect::<Vec<_>>())?;
    writer.rids(&rids)?;
    writer.finish()?;

    let part = Config::new(&folder).open()?;

    for row in 0..64u32 {
        let rid = part.rid_of_row(row)?.expect("rid exists");
        assert_eq!(Some(row), part.row_from_rid(rid)?);
    }

    Ok(())
}

#[test]
fn rid_set_evaluation_intersects_the_mask() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let mut writer = bitpart::PartitionWriter::create(&folder, "rid_set")?;
    writer.column_i32("x", &[0, 1, 2, 3, 4])?;
    writer.rids(&[Rid(50), Rid(40), Rid(30), Rid(20), Rid(10)])?;
    writer.mask(&[true, true, true, false, true])?;
    writer.finish()?;

    let part = Config::new(&folder).open()?;

    // rid 20 maps to row 3, which is masked out
    let hits = part.evaluate_rid_set(&[Rid(50), Rid(20), Rid(10), Rid(77)])?;
    assert_eq!(vec![0, 4], hits.ones().collect::<Vec<_>>());

    Ok(())
}

#[test]
fn missing_rid_file_means_row_numbers() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let mut writer = bitpart::PartitionWriter::create(&folder, "implicit_rids")?;
    writer.column_i32("x", &[7, 8, 9])?;
    writer.finish()?;

    let part = Config::new(&folder).open()?;

    assert_eq!(Some(1), part.row_from_rid(Rid(1))?);
    assert_eq!(None, part.row_from_rid(Rid(3))?);

    let hits = part.evaluate_rid_set(&[Rid(0), Rid(2), Rid(9)])?;
    assert_eq!(vec![0, 2], hits.ones().collect::<Vec<_>>());

    Ok(())
}
