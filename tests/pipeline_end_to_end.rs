use hcdr::config::{PipelineConfig, SequenceTableConfig};
use hcdr::ensemble::boosting::BoostingConfig;
use hcdr::ensemble::results::SplitKind;
use hcdr::pipeline::{
    SourceTables, kfold_splits, prepare_fold, run_test_prediction, run_validation,
};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const APPLICANTS: i64 = 80;
const TEST_APPLICANTS: i64 = 12;

fn is_default(id: i64) -> bool {
    id % 5 == 0
}

fn application_row(out: &mut String, id: i64, with_target: bool) {
    let default = is_default(id);
    let credit = 100_000.0 + (id * 7_919 % 50) as f64 * 4_000.0;
    let goods = if id % 9 == 0 {
        String::new()
    } else {
        format!("{}", credit * 0.9 + (id % 7) as f64 * 500.0)
    };
    let annuity = if id % 11 == 0 {
        String::new()
    } else {
        format!("{}", credit / 20.0 + (id % 3) as f64 * 100.0)
    };
    let floors = if id % 4 == 0 {
        String::new()
    } else {
        format!("{:.3}", 0.1 + (id % 10) as f64 * 0.05)
    };
    let house = match id % 6 {
        0 => "",
        1 | 2 => "terraced house",
        _ => "block of flats",
    };
    // The test table has no bureau request counts at all.
    let requests = if !with_target || id % 8 == 0 {
        String::new()
    } else {
        format!("{}", id % 4)
    };
    let signal = if default { 0.2 } else { 0.7 } + (id % 10) as f64 * 0.01;
    if with_target {
        write!(out, "{id},{},", u8::from(default)).unwrap();
    } else {
        write!(out, "{id},").unwrap();
    }
    writeln!(
        out,
        "{},{},{credit},{goods},{annuity},{:.3},{:.3},{floors},{house},{requests},{signal:.3}",
        if id % 2 == 0 { "Y" } else { "N" },
        if id % 3 == 0 { "Revolving loans" } else { "Cash loans" },
        0.01 + (id % 13) as f64 * 0.02,
        0.02 + (id % 17) as f64 * 0.015,
    )
    .unwrap();
}

const APPLICATION_COLUMNS: &str = "FLAG_OWN_CAR,NAME_CONTRACT_TYPE,AMT_CREDIT,AMT_GOODS_PRICE,\
                                   AMT_ANNUITY,APARTMENTS_AVG,LIVINGAREA_AVG,FLOORSMAX_AVG,\
                                   HOUSETYPE_MODE,AMT_REQ_CREDIT_BUREAU_YEAR,EXT_SOURCE_2";

fn write_tables(dir: &Path) {
    let mut train = format!("SK_ID_CURR,TARGET,{APPLICATION_COLUMNS}\n");
    for id in 1..=APPLICANTS {
        application_row(&mut train, id, true);
    }
    fs::write(dir.join("application_train.csv"), train).unwrap();

    let mut test = format!("SK_ID_CURR,{APPLICATION_COLUMNS}\n");
    for id in 1001..1001 + TEST_APPLICANTS {
        application_row(&mut test, id, false);
    }
    fs::write(dir.join("application_test.csv"), test).unwrap();

    let all_ids: Vec<i64> = (1..=APPLICANTS).chain(1001..1001 + TEST_APPLICANTS).collect();

    let mut bureau = String::from("SK_ID_CURR,SK_ID_BUREAU,AMT_CREDIT_SUM,CREDIT_ACTIVE\n");
    let mut bureau_balance = String::from("SK_ID_BUREAU,MONTHS_BALANCE,STATUS\n");
    let mut previous =
        String::from("SK_ID_CURR,SK_ID_PREV,AMT_APPLICATION,NAME_CONTRACT_STATUS\n");
    let mut card = String::from(
        "SK_ID_PREV,SK_ID_CURR,MONTHS_BALANCE,AMT_BALANCE,NAME_CONTRACT_STATUS\n",
    );
    for &id in &all_ids {
        // Every third applicant has no bureau record.
        if id % 3 != 0 {
            for k in 0..2 {
                let bureau_id = id * 10 + k;
                let active = if k == 0 { "Active" } else { "Closed" };
                writeln!(bureau, "{id},{bureau_id},{},{active}", 5_000 * (k + 1) + id).unwrap();
                for month in 0..3 {
                    let status = if is_default(id) && month == 0 { "1" } else { "C" };
                    writeln!(bureau_balance, "{bureau_id},{},{status}", -month).unwrap();
                }
            }
        }
        let status = if is_default(id) { "Refused" } else { "Approved" };
        writeln!(previous, "{id},{},{},{status}", id * 100, 20_000 + id * 10).unwrap();
        if id % 4 != 1 {
            for month in 0..(2 + id % 5) {
                let base = if is_default(id) { 9_000.0 } else { 1_000.0 };
                let balance = base + month as f64 * 50.0;
                writeln!(card, "{},{id},{},{balance},Active", id * 100, -month).unwrap();
            }
        }
    }
    fs::write(dir.join("bureau.csv"), bureau).unwrap();
    fs::write(dir.join("bureau_balance.csv"), bureau_balance).unwrap();
    fs::write(dir.join("previous_application.csv"), previous).unwrap();
    fs::write(dir.join("credit_card_balance.csv"), card).unwrap();
}

fn small_config(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig {
        data_dir: dir.to_path_buf(),
        output: dir.join("results.csv"),
        ..PipelineConfig::default()
    };
    let strings = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
    config.assembler.flag_columns = strings(&["FLAG_OWN_CAR"]);
    config.assembler.home_numeric_columns =
        strings(&["APARTMENTS_AVG", "LIVINGAREA_AVG", "FLOORSMAX_AVG"]);
    config.assembler.home_categorical_columns = strings(&["HOUSETYPE_MODE"]);
    config.assembler.pca_components = 2;
    config.assembler.bureau_request_columns = strings(&["AMT_REQ_CREDIT_BUREAU_YEAR"]);
    config.sequences = vec![
        SequenceTableConfig {
            name: "credit_card".to_string(),
            file: "credit_card_balance.csv".to_string(),
            drop_columns: strings(&["SK_ID_PREV"]),
            tmax: 4,
            ..SequenceTableConfig::default()
        },
        SequenceTableConfig {
            name: "bureau_balance".to_string(),
            file: "bureau_balance.csv".to_string(),
            key_column: "SK_ID_BUREAU".to_string(),
            lookup_file: Some("bureau.csv".to_string()),
            tmax: 3,
            ..SequenceTableConfig::default()
        },
    ];
    config.models.boosting = BoostingConfig {
        n_estimators: 5,
        ..BoostingConfig::default()
    };
    config.validate().unwrap();
    config
}

#[test]
fn validation_run_writes_the_canonical_results_table() {
    let dir = TempDir::new().unwrap();
    write_tables(dir.path());
    let config = small_config(dir.path());

    let report = run_validation(&config).unwrap();
    let names: Vec<&str> = report.model_auc.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["linear", "gradient_boosting", "adaboost", "sequence"]);

    let records = report.results.records();
    assert_eq!(records.len(), APPLICANTS as usize);
    let validation_rows = records
        .iter()
        .filter(|r| r.split == SplitKind::Validation)
        .count();
    assert_eq!(validation_rows, 20);
    assert!(records.iter().all(|r| r.target.is_some()));
    assert!(records.iter().all(|r| (0.0..=1.0).contains(&r.blend)));

    report.results.write(&config.output).unwrap();
    let text = fs::read_to_string(&config.output).unwrap();
    assert_eq!(
        text.lines().next().unwrap(),
        "SK_ID_CURR,split,TARGET,linear,gradient_boosting,adaboost,sequence,BLEND"
    );
    assert_eq!(text.lines().count(), APPLICANTS as usize + 1);
}

#[test]
fn training_and_validation_features_share_one_layout() {
    let dir = TempDir::new().unwrap();
    write_tables(dir.path());
    let config = small_config(dir.path());

    let tables = SourceTables::load(&config).unwrap();
    let splits = kfold_splits(tables.applications.height(), 4, config.seed).unwrap();
    let (train_rows, validation_rows) = &splits[3];
    let prepared = prepare_fold(&tables, &config, train_rows, validation_rows).unwrap();

    assert_eq!(prepared.train.feature_names, prepared.evaluation.feature_names);
    assert!(prepared.train.feature_names.iter().any(|n| n == "NA_COLS"));
    assert!(prepared.train.feature_names.iter().any(|n| n == "CURR_HOME_0"));
    assert!(!prepared.train.feature_names.iter().any(|n| n == "FLOORSMAX_AVG"));
    assert!(!prepared.train.feature_names.iter().any(|n| n == "TARGET"));
    assert!(prepared.train.features.iter().all(|v| v.is_finite()));
    assert!(prepared.evaluation.features.iter().all(|v| v.is_finite()));

    let shapes = prepared.input_shapes();
    assert_eq!(shapes.features, prepared.train.feature_names.len());
    assert_eq!(shapes.sequences.len(), 2);
    assert_eq!(shapes.sequences[0].0, 4);
    assert_eq!(shapes.sequences[1].0, 3);
    assert_eq!(prepared.evaluation_input.n_samples(), validation_rows.len());
}

#[test]
fn test_prediction_leaves_the_label_empty() {
    let dir = TempDir::new().unwrap();
    write_tables(dir.path());
    let config = small_config(dir.path());

    let results = run_test_prediction(&config).unwrap();
    let test_records: Vec<_> = results
        .records()
        .iter()
        .filter(|r| r.split == SplitKind::Test)
        .collect();
    assert_eq!(test_records.len(), TEST_APPLICANTS as usize);
    assert!(test_records.iter().all(|r| r.target.is_none()));
    assert!(test_records.iter().all(|r| r.predictions.len() == 4));
    assert!(
        test_records
            .iter()
            .flat_map(|r| r.predictions.iter())
            .all(|p| (0.0..=1.0).contains(p))
    );

    results.write(&config.output).unwrap();
    let text = fs::read_to_string(&config.output).unwrap();
    let last = text.lines().last().unwrap();
    assert!(last.starts_with("1012,test,,"));
}
