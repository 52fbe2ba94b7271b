use std::fs;
use std::path::Path;

use logclust::{
    Algorithm, Category, ClusterCountSource, ClusterError, ClusterLabel, Corpus, DictionarySink,
    InternTables, NoisePolicy, OutputText, Pipeline, PipelineConfig, Policy, SqliteStore,
    SEPARATOR,
};

fn hdfs_lines() -> Vec<String> {
    let mut lines = Vec::new();
    for i in 0..4 {
        lines.push(format!(
            "081109 20361{i} INFO dfs.DataNode$DataXceiver: Receiving block blk_{i} src: /10.250.19.{i}:50010"
        ));
        lines.push(format!(
            "081109 20362{i} INFO dfs.FSDataset: Deleting block blk_{i} file /mnt/hadoop/dfs/data/current/blk_{i}"
        ));
    }
    lines
}

fn write_input(dir: &Path, lines: &[String]) -> std::path::PathBuf {
    let path = dir.join("HDFS.log");
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(&path, content).unwrap();
    path
}

fn two_cluster_config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        input: write_input(dir, &hdfs_lines()),
        output: dir.join("out").join("clustered_logs.txt"),
        clusters: ClusterCountSource::Fixed { count: 2 },
        ..PipelineConfig::default()
    }
}

#[test]
fn fixed_token_kmeans_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = two_cluster_config(dir.path());
    let output = config.output.clone();
    let summary = Pipeline::new(config).unwrap().execute().unwrap();
    assert_eq!(summary.lines, 8);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.clusters, 2);
    assert_eq!(summary.cluster_sizes, vec![4, 4]);
    assert_eq!(summary.written, 8);

    let written = fs::read_to_string(&output).unwrap();
    let records: Vec<&str> = written.lines().collect();
    assert_eq!(records.len(), 8);
    assert_eq!(
        records[0],
        "<TIMESTAMP> info dfs.datanode$dataxceiver: receiving block <BLOCK> src: /<IP_PORT>|ClusterID: 0"
    );
    for (i, record) in records.iter().enumerate() {
        let (_, id) = record.rsplit_once(SEPARATOR).unwrap();
        assert_eq!(id, if i % 2 == 0 { "0" } else { "1" });
    }
}

#[test]
fn same_seed_same_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = two_cluster_config(dir.path());
    let output = config.output.clone();
    let pipeline = Pipeline::new(config).unwrap();
    pipeline.execute().unwrap();
    let first = fs::read_to_string(&output).unwrap();
    pipeline.execute().unwrap();
    assert_eq!(fs::read_to_string(&output).unwrap(), first);
}

#[test]
fn interning_replay_creates_no_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("logs.db");
    let config = PipelineConfig {
        store: Some(db.clone()),
        policy: Policy::Interning,
        components: 0,
        ..two_cluster_config(dir.path())
    };
    let output = config.output.clone();
    let pipeline = Pipeline::new(config).unwrap();

    let first = pipeline.execute().unwrap();
    // 8 timestamps, 4 blocks, 4 addresses, 1 directory
    assert_eq!(first.interned, 17);
    let first_output = fs::read_to_string(&output).unwrap();
    assert!(first_output.starts_with(
        "^1 INFO dfs.DataNode$DataXceiver: Receiving block #1 src: /@1|ClusterID: "
    ));

    let second = pipeline.execute().unwrap();
    assert_eq!(second.interned, 17);
    assert_eq!(fs::read_to_string(&output).unwrap(), first_output);

    let store = SqliteStore::open(&db).unwrap();
    let tables = store.load_tables().unwrap();
    assert_eq!(tables.entry_count(), 17);
    assert_eq!(tables.block.resolve(2), Some("blk_1"));
    assert_eq!(store.result_count().unwrap(), 16);
}

#[test]
fn interned_lines_expand_to_the_originals() {
    let lines = hdfs_lines();
    let corpus = Corpus::from_lines(lines.clone());
    let pipeline = Pipeline::new(PipelineConfig {
        policy: Policy::Interning,
        components: 0,
        clusters: ClusterCountSource::Fixed { count: 2 },
        ..PipelineConfig::default()
    })
    .unwrap();
    let run = pipeline.run(&corpus, InternTables::new(), None).unwrap();
    for (line, original) in run.normalized.iter().zip(&lines) {
        assert_eq!(run.tables.expand(line).as_deref(), Some(original.as_str()));
    }
}

#[test]
fn estimated_cluster_count() {
    let mut lines = Vec::new();
    for i in 0..40 {
        lines.push(format!("Receiving block blk_{i} of size {}", 1000 + i));
        lines.push(format!("PacketResponder {i} for block blk_{i} terminating"));
    }
    for i in 0..20 {
        lines.push(format!("Verification succeeded for blk_{i}"));
    }
    let corpus = Corpus::from_lines(lines);
    let pipeline = Pipeline::new(PipelineConfig {
        components: 0,
        clusters: ClusterCountSource::Estimated {
            threshold: None,
            min_clusters: None,
        },
        ..PipelineConfig::default()
    })
    .unwrap();
    let run = pipeline.run(&corpus, InternTables::new(), None).unwrap();
    assert_eq!(run.templates.len(), 3);
    assert_eq!(run.cluster_count, Some(3));
    assert_eq!(run.assignment.sizes(), vec![40, 40, 20]);
}

#[test]
fn dbscan_reports_outliers_as_noise() {
    let mut lines: Vec<String> = (0..10)
        .map(|i| format!("081109 2036{i:02} Receiving block blk_{i}"))
        .collect();
    lines.push("kernel panic unexpected shutdown".to_string());
    let corpus = Corpus::from_lines(lines);
    let pipeline = Pipeline::new(PipelineConfig {
        components: 0,
        algorithm: Algorithm::Dbscan {
            eps: 0.5,
            min_samples: 3,
        },
        ..PipelineConfig::default()
    })
    .unwrap();
    let run = pipeline.run(&corpus, InternTables::new(), None).unwrap();
    assert_eq!(run.cluster_count, None);
    let labels = run.assignment.labels();
    assert!(labels[..10].iter().all(|&l| l == ClusterLabel::Member(0)));
    assert_eq!(labels[10], ClusterLabel::Noise);

    let mut out = Vec::new();
    run.write(&corpus, &mut out, OutputText::Original, NoisePolicy::Report)
        .unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.ends_with("kernel panic unexpected shutdown|ClusterID: -1\n"));

    let mut out = Vec::new();
    let n = run
        .write(&corpus, &mut out, OutputText::Original, NoisePolicy::Drop)
        .unwrap();
    assert_eq!(n, 10);
}

#[test]
fn undecodable_lines_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = two_cluster_config(dir.path());
    let mut bytes = fs::read(&config.input).unwrap();
    bytes.extend_from_slice(b"\xff\xfe broken\n");
    config.input = dir.path().join("mixed.log");
    fs::write(&config.input, bytes).unwrap();
    let summary = Pipeline::new(config).unwrap().execute().unwrap();
    assert_eq!(summary.lines, 8);
    assert_eq!(summary.skipped, 1);
}

#[test]
fn missing_input_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        input: dir.path().join("absent.log"),
        ..two_cluster_config(dir.path())
    };
    let output = config.output.clone();
    assert!(Pipeline::new(config).unwrap().execute().is_err());
    assert!(!output.exists());
}

#[test]
fn directory_input_is_searchable() {
    let dir = tempfile::tempdir().unwrap();
    let logs = dir.path().join("logs");
    let lines = hdfs_lines();
    fs::create_dir_all(logs.join("node2")).unwrap();
    fs::write(logs.join("a.log"), lines[..4].join("\n")).unwrap();
    fs::write(logs.join("node2").join("b.log"), lines[4..].join("\n")).unwrap();
    fs::write(logs.join("README"), "not a log line").unwrap();

    let config = PipelineConfig {
        input: logs.clone(),
        store: Some(dir.path().join("logs.db")),
        policy: Policy::Interning,
        components: 0,
        ..two_cluster_config(dir.path())
    };
    let pipeline = Pipeline::new(config).unwrap();
    let (summary, hits) = pipeline.execute_search("blk_2").unwrap();
    assert_eq!(summary.lines, 8);
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].index, 4);
    assert_eq!(hits[0].line, lines[4]);
    assert_eq!(hits[1].line, lines[5]);

    let corpus = Corpus::from_path(&logs).unwrap();
    assert_eq!(corpus.sources().len(), 2);
    let (file, line) = corpus.locate(hits[0].index).unwrap();
    assert_eq!(file, logs.join("node2").join("b.log"));
    assert_eq!(line, 0);
}

#[test]
fn store_entries_are_never_reassigned() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("logs.db");
    let mut store = SqliteStore::open(&db).unwrap();
    store.record(Category::Timestamp, 1, "081109 999999").unwrap();
    let pipeline = Pipeline::new(PipelineConfig {
        store: Some(db.clone()),
        policy: Policy::Interning,
        ..two_cluster_config(dir.path())
    })
    .unwrap();
    // Seeded from the store, so ids continue after the stale entry.
    let summary = pipeline.execute().unwrap();
    assert_eq!(summary.interned, 18);

    let mut fresh = InternTables::new();
    let err = fresh
        .intern(Category::Timestamp, "081109 203610", Some(&mut store))
        .unwrap_err();
    assert!(matches!(err, ClusterError::Validation(_)));
}

#[test]
fn results_are_committed_before_output_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("logs.db");
    let config = PipelineConfig {
        store: Some(db.clone()),
        ..two_cluster_config(dir.path())
    };
    fs::create_dir_all(&config.output).unwrap();
    assert!(Pipeline::new(config).unwrap().execute().is_err());
    assert_eq!(SqliteStore::open(&db).unwrap().result_count().unwrap(), 8);
}
