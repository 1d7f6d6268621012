use bitpart::{Config, Predicate};
use test_log::test;

fn category_fixture(folder: &std::path::Path) -> bitpart::Result<()> {
    let mut writer = bitpart::PartitionWriter::create(folder, "categories")?;
    writer.category("c", &["a", "b", "c", "a", "b"])?;
    writer.meta_tag("source", "unit test");
    writer.finish()?;
    Ok(())
}

#[test]
fn string_equality() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;
    category_fixture(folder.path())?;

    let part = Config::new(&folder).open()?;

    let hits = part.evaluate(&Predicate::string_eq("c", "b"))?;
    assert_eq!(vec![1, 4], hits.ones().collect::<Vec<_>>());

    // a value outside the dictionary matches nothing
    let hits = part.evaluate(&Predicate::string_eq("c", "zebra"))?;
    assert_eq!(0, hits.count_ones());

    Ok(())
}

#[test]
fn multi_string_membership() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;
    category_fixture(folder.path())?;

    let part = Config::new(&folder).open()?;

    let pred = Predicate::StringIn {
        column: "c".into(),
        values: vec!["a".into(), "c".into()],
    };

    let hits = part.evaluate(&pred)?;
    assert_eq!(vec![0, 2, 3], hits.ones().collect::<Vec<_>>());

    Ok(())
}

#[test]
fn like_pattern_over_dictionary() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let mut writer = bitpart::PartitionWriter::create(folder.path(), "like_cat")?;
    writer.category("c", &["apple", "banana", "apricot", "cherry"])?;
    writer.finish()?;

    let part = Config::new(&folder).open()?;

    let pred = Predicate::Like {
        column: "c".into(),
        pattern: "ap%".into(),
    };

    let hits = part.evaluate(&pred)?;
    assert_eq!(vec![0, 2], hits.ones().collect::<Vec<_>>());

    Ok(())
}

#[test]
fn text_keywords() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;

    let mut writer = bitpart::PartitionWriter::create(folder.path(), "text_kw")?;
    writer.text(
        "t",
        &[
            "the quick brown fox",
            "lazy dog sleeps",
            "quick dog runs",
            "",
        ],
    )?;
    writer.finish()?;

    let part = Config::new(&folder).open()?;

    let pred = Predicate::Keyword {
        column: "t".into(),
        word: "quick".into(),
    };
    assert_eq!(
        vec![0, 2],
        part.evaluate(&pred)?.ones().collect::<Vec<_>>()
    );

    let pred = Predicate::AllKeywords {
        column: "t".into(),
        words: vec!["quick".into(), "dog".into()],
    };
    assert_eq!(vec![2], part.evaluate(&pred)?.ones().collect::<Vec<_>>());

    let pred = Predicate::string_eq("t", "lazy dog sleeps");
    assert_eq!(vec![1], part.evaluate(&pred)?.ones().collect::<Vec<_>>());

    Ok(())
}

#[test]
fn meta_tags_answer_like_category_columns() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;
    category_fixture(folder.path())?;

    let part = Config::new(&folder).open()?;

    // matching tag value selects every active row
    let hits = part.evaluate(&Predicate::string_eq("source", "unit test"))?;
    assert_eq!(5, hits.count_ones());

    // non-matching value selects none
    let hits = part.evaluate(&Predicate::string_eq("source", "elsewhere"))?;
    assert_eq!(0, hits.count_ones());

    // unknown name is an error, not an empty result
    assert!(matches!(
        part.evaluate(&Predicate::string_eq("no_such_thing", "x")),
        Err(bitpart::Error::UnknownColumn(_)),
    ));

    Ok(())
}

#[test]
fn range_over_category_codes() -> bitpart::Result<()> {
    let folder = tempfile::tempdir()?;
    category_fixture(folder.path())?;

    let part = Config::new(&folder).open()?;

    // codes are assigned in first-appearance order: a=0, b=1, c=2
    let hits = part.evaluate(&Predicate::range("c").at_most(0.0))?;
    assert_eq!(vec![0, 3], hits.ones().collect::<Vec<_>>());

    Ok(())
}
