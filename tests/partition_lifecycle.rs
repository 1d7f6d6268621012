use bitpart::{Config, PartitionState, Predicate};
use test_log::test;

fn fixture(folder: &std::path::Path, name: &str) -> bitpart::Result<()> {
    let mut writer = bitpart::PartitionWriter::create(folder, name)?;
    writer.column_i32("x", &[1, 2, 3, 4])?;
    writer.column_f32("y", &[0.1, 0.2, 0.3, 0.4])?;
    writer.finish()?;
    Ok(())
}

#[test]
fn backup_is_cloned_when_missing() -> bitpart::Result<()> {
    let root = tempfile::tempdir()?;
    let active = root.path().join("active");
    let backup = root.path().join("backup");

    fixture(&active, "with_backup")?;

    let part = Config::new(&active).use_backup_dir(&backup).open()?;
    part.wait_for_backup();

    assert!(backup.join("-part.txt").exists());
    assert!(backup.join("x").exists());
    assert!(backup.join("y").exists());

    let active_size = fs_extra::dir::get_size(&active).expect("size");
    let backup_size = fs_extra::dir::get_size(&backup).expect("size");
    assert_eq!(active_size, backup_size);

    // queries keep answering while and after the copy
    assert_eq!(4, part.count_hits(&Predicate::range("x").at_least(0.0))?);

    Ok(())
}

#[test]
fn consistent_backup_is_left_alone() -> bitpart::Result<()> {
    let root = tempfile::tempdir()?;
    let active = root.path().join("active");
    let backup = root.path().join("backup");

    fixture(&active, "stable_backup")?;

    {
        let part = Config::new(&active).use_backup_dir(&backup).open()?;
        part.wait_for_backup();
    }

    let marker = backup.join("x");
    let before = std::fs::metadata(&marker)?.modified()?;

    {
        let part = Config::new(&active).use_backup_dir(&backup).open()?;
        part.wait_for_backup();
    }

    assert_eq!(before, std::fs::metadata(&marker)?.modified()?);

    Ok(())
}

#[test]
fn rename_appends_digits_on_collision() -> bitpart::Result<()> {
    let root = tempfile::tempdir()?;
    let dir_a = root.path().join("a");
    let dir_b = root.path().join("b");

    fixture(&dir_a, "rename_target")?;
    fixture(&dir_b, "rename_source")?;

    let part_a = Config::new(&dir_a).open()?;
    let part_b = Config::new(&dir_b).open()?;

    assert_eq!("rename_target", part_a.name());

    // the name is taken, so a unique suffix is appended
    let renamed = part_b.rename("rename_target")?;
    assert_ne!("rename_target", renamed);
    assert!(renamed.starts_with("rename_target"));
    assert_eq!(renamed, part_b.name());

    Ok(())
}

#[test]
fn non_stable_state_refuses_queries() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let mut writer = bitpart::PartitionWriter::create(&folder, "receiving")?;
    writer.column_i32("x", &[1, 2])?;
    writer.state(PartitionState::Receiving);
    writer.finish()?;

    let part = Config::new(&folder).open()?;

    assert_eq!(PartitionState::Receiving, part.state());
    assert!(matches!(
        part.evaluate(&Predicate::range("x").at_least(0.0)),
        Err(bitpart::Error::NotQueryable),
    ));

    Ok(())
}

#[test]
fn state_machine_edges_hold() {
    use PartitionState::{PostTransition, PreTransition, Receiving, Stable, Unknown};

    assert!(Unknown.can_transition_to(Stable));
    assert!(Stable.can_transition_to(Receiving));
    assert!(Receiving.can_transition_to(PreTransition));
    assert!(PreTransition.can_transition_to(PostTransition));
    assert!(PostTransition.can_transition_to(Stable));
    assert!(!Stable.can_transition_to(PreTransition));
}

#[test]
fn concurrent_readers_see_a_consistent_snapshot() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let values: Vec<i32> = (0..2_000).collect();
    let name = format!("snapshot_{}", nanoid::nanoid!(8));
    let mut writer = bitpart::PartitionWriter::create(&folder, &name)?;
    writer.column_i32("v", &values)?;
    writer.finish()?;

    let part = Config::new(&folder).open()?;
    let pred = Predicate::range("v").between(100.0, 1_500.0);

    let expected = part.count_hits(&pred)?;

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let part = &part;
                let pred = &pred;
                s.spawn(move || part.count_hits(pred))
            })
            .collect();

        for handle in handles {
            let count = handle.join().expect("reader panicked")?;
            assert_eq!(expected, count);
        }

        Ok::<_, bitpart::Error>(())
    })?;

    Ok(())
}

#[test]
fn cleaner_eviction_does_not_change_answers() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let values: Vec<i64> = (0..1_000).map(|i| i * 3).collect();
    let mut writer = bitpart::PartitionWriter::create(&folder, "evictable")?;
    writer.column_i64("v", &values)?;
    writer.finish()?;

    let fm = std::sync::Arc::new(bitpart::FileManager::with_capacity_bytes(1 << 20));
    let part = Config::new(&folder).use_file_manager(fm.clone()).open()?;

    part.build_indexes(
        &bitpart::IndexOptions::single(bitpart::IndexSpec::Binned { nbins: 8 }),
        1,
    )?;

    let pred = Predicate::range("v").between(300.0, 1_200.0);
    let before = part.evaluate(&pred)?;

    // memory pressure unloads the index
    assert!(fm.run_cleaners() >= 1);
    assert!(!part.has_index("v"));

    assert_eq!(before, part.evaluate(&pred)?);

    Ok(())
}
