mod common;

use std::collections::{BTreeMap, BTreeSet};

use common::{batch, column_values, values};
use crump::data::{DataType, Value};
use crump::db::{ExistingColumn, SqliteDatabase};
use crump::detect::{DetectedColumn, DetectedColumns};
use crump::job::{ColumnMapping, FilenameColumn, FilenameExtraction, FilenamePattern, Job};
use crump::schema::{SchemaSnapshot, reconcile};
use crump::sync::reap::{Staleness, staleness};
use crump::sync::{PartitionValues, ReapOutcome, SkipReason, sync};
use proptest::prelude::*;

fn scoped_job() -> Job {
    Job::new(
        "pairs",
        "pairs",
        vec![ColumnMapping::same("a"), ColumnMapping::same("b")],
    )
    .with_filename_extraction(FilenameExtraction {
        pattern: FilenamePattern::Template("pairs_[part].csv".to_string()),
        columns: vec![FilenameColumn::new("part").scoping_deletes()],
    })
}

fn pairs_csv(pairs: &BTreeSet<(u8, u8)>) -> String {
    let mut csv = String::from("a,b,v\n");
    for (a, b) in pairs {
        csv.push_str(&format!("{a},{b},{a}{b}\n"));
    }
    csv
}

fn stored_pairs(db: &SqliteDatabase, part: &str) -> BTreeSet<(u8, u8)> {
    column_values(
        db,
        &format!("SELECT a || ',' || b FROM pairs WHERE part = '{part}'"),
    )
    .into_iter()
    .map(|pair| {
        let (a, b) = pair.split_once(',').expect("pair");
        (a.parse().expect("a"), b.parse().expect("b"))
    })
    .collect()
}

fn column_name() -> impl Strategy<Value = String> {
    "[a-h]{1,3}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn reconcile_only_ever_adds_columns(
        existing in prop::collection::btree_set(column_name(), 0..6),
        incoming in prop::collection::btree_set(column_name(), 1..6),
    ) {
        let incoming: Vec<String> = incoming.into_iter().collect();
        let job = Job::new("j", "t", vec![ColumnMapping::same(incoming[0].clone())]);
        let detected: DetectedColumns = incoming
            .iter()
            .map(|name| (name.clone(), DetectedColumn { data_type: DataType::Integer, nullable: false }))
            .collect();
        let snapshot = SchemaSnapshot {
            table: "t".to_string(),
            exists: true,
            columns: existing
                .iter()
                .map(|name| ExistingColumn { name: name.clone(), sql_type: "TEXT".to_string() })
                .collect(),
            indexes: Vec::new(),
        };
        let plan = reconcile(&snapshot, &job, &detected).unwrap();
        prop_assert!(!plan.create_table);
        for column in &plan.columns_to_add {
            prop_assert!(!existing.contains(&column.name));
        }
        for name in &incoming {
            prop_assert!(
                existing.contains(name) || plan.columns_to_add.iter().any(|c| &c.name == name)
            );
        }
    }

    #[test]
    fn incomplete_partitions_never_produce_a_delete(
        keys in prop::collection::vec((any::<i64>(), any::<i64>()), 0..20),
        with_part in any::<bool>(),
    ) {
        let job = scoped_job();
        let current: Vec<Vec<Value>> = keys
            .iter()
            .map(|(a, b)| vec![Value::Integer(*a), Value::Integer(*b)])
            .collect();
        let mut partition = PartitionValues::new();
        if with_part {
            partition.insert("other".to_string(), Value::String("x".to_string()));
        }
        let outcome = staleness(&job, &partition, &current, &BTreeMap::new());
        prop_assert_eq!(
            outcome,
            Staleness::NotApplicable(ReapOutcome::Skipped(SkipReason::NoPartitionValues))
        );
    }

    #[test]
    fn resync_leaves_exactly_the_latest_key_set(
        first in prop::collection::btree_set((0u8..3, 0u8..3), 1..9),
        second in prop::collection::btree_set((0u8..3, 0u8..3), 1..9),
        neighbour in prop::collection::btree_set((0u8..3, 0u8..3), 1..9),
    ) {
        let job = scoped_job();
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let p1 = values(&[("part", "p1")]);
        let p2 = values(&[("part", "p2")]);

        let rows = batch(&job, &pairs_csv(&first), Some(&p1));
        sync(&rows, &job, &mut db, Some(&p1)).unwrap();
        let rows = batch(&job, &pairs_csv(&neighbour), Some(&p2));
        sync(&rows, &job, &mut db, Some(&p2)).unwrap();

        let rows = batch(&job, &pairs_csv(&second), Some(&p1));
        let report = sync(&rows, &job, &mut db, Some(&p1)).unwrap();
        let expected_deleted = first
            .difference(&second)
            .filter(|pair| !neighbour.contains(pair))
            .count() as u64;
        prop_assert_eq!(report.reap, ReapOutcome::Deleted(expected_deleted));
        prop_assert_eq!(stored_pairs(&db, "p1"), second.clone());

        let again = sync(&rows, &job, &mut db, Some(&p1)).unwrap();
        prop_assert_eq!(again.rows_synced, report.rows_synced);
        prop_assert_eq!(again.reap, ReapOutcome::Deleted(0));
        prop_assert_eq!(stored_pairs(&db, "p1"), second);
    }
}
