use vanga::concurrency::CancelToken;
use vanga::error::NullSink;
use vanga::matrix::{Label, Row, SampleMatrix};
use vanga::segment::{
    FeaturizerConfig, SegmentEntry, SegmentProfile, SegmentStore, SegmentStoreConfig,
};
use vanga::tree::{Tree, TreeLearner, TreeLearnerConfig};
use vanga::wire::tree_file;

fn rows_matrix(rows: Vec<(Vec<u32>, f64)>) -> SampleMatrix {
    SampleMatrix::from_rows(
        rows.into_iter()
            .map(|(features, y)| (Row::new(features), Label::cold(y)))
            .collect(),
    )
}

fn log_loss(matrix: &SampleMatrix, tree: &Tree) -> f64 {
    let mut total = 0.0;
    let mut count = 0u64;
    for group in matrix.groups() {
        let p = group.label.p + tree.predict(&group.features);
        let prob = 1.0 / (1.0 + (-p).exp());
        let prob = prob.clamp(1e-12, 1.0 - 1e-12);
        let term = if group.label.y > 0.5 {
            -prob.ln()
        } else {
            -(1.0 - prob).ln()
        };
        total += term * group.count as f64;
        count += group.count;
    }
    total / count as f64
}

#[test]
fn xor_non_separable_requires_depth_two() {
    let mut rows = Vec::new();
    for _ in 0..10 {
        rows.push((vec![1], 0.0));
    }
    for _ in 0..10 {
        rows.push((vec![2], 1.0));
    }
    for _ in 0..10 {
        rows.push((vec![1, 2], 0.0));
    }
    for _ in 0..10 {
        rows.push((vec![], 1.0));
    }
    let matrix = rows_matrix(rows);

    let config = TreeLearnerConfig::builder()
        .step_depth(2)
        .check_depth(2)
        .min_cover(0.01)
        .max_iterations(20)
        .build()
        .unwrap();
    let learner = TreeLearner::new(&matrix, config);
    let tree = learner
        .train(&Tree::leaf(0.0), &matrix, &CancelToken::new(), &NullSink)
        .unwrap();

    let predict = |features: Vec<u32>| tree.predict(&Row::new(features));
    assert!(predict(vec![1]) < -10.0);
    assert!(predict(vec![2]) > 10.0);
    assert!(predict(vec![1, 2]) < -10.0);
    assert!(predict(vec![]) > 10.0);

    assert!(log_loss(&matrix, &tree) < 0.05);
}

#[test]
fn and_separable_improves_after_two_splits() {
    let mut rows = Vec::new();
    for _ in 0..10 {
        rows.push((vec![], 0.0));
    }
    for _ in 0..10 {
        rows.push((vec![1], 0.0));
    }
    for _ in 0..10 {
        rows.push((vec![2], 0.0));
    }
    for _ in 0..10 {
        rows.push((vec![1, 2], 1.0));
    }
    let matrix = rows_matrix(rows);

    let config = TreeLearnerConfig::builder()
        .step_depth(2)
        .check_depth(2)
        .max_iterations(20)
        .build()
        .unwrap();
    let learner = TreeLearner::new(&matrix, config);
    let tree = learner
        .train(&Tree::leaf(0.0), &matrix, &CancelToken::new(), &NullSink)
        .unwrap();

    assert!(log_loss(&matrix, &tree) < 0.1);
    assert!(tree.predict(&Row::new(vec![1, 2])) > tree.predict(&Row::new(vec![1])));
}

#[test]
fn tree_file_round_trips_through_disk() {
    let tree = Tree::split(
        2,
        Tree::split(1, Tree::leaf(1.5), Tree::leaf(-1.5)),
        Tree::leaf(0.0),
    );
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.tree");

    let mut file = std::fs::File::create(&path).unwrap();
    tree_file::save(&mut file, std::slice::from_ref(&tree)).unwrap();
    drop(file);

    let mut reader = std::io::BufReader::new(std::fs::File::open(&path).unwrap());
    let loaded = tree_file::load(&mut reader).unwrap();
    assert_eq!(loaded, vec![tree]);
}

#[test]
fn segment_store_merge_then_featurize() {
    let dir = tempfile::tempdir().unwrap();
    let store = SegmentStore::open(dir.path(), SegmentStoreConfig::builder().build().unwrap())
        .unwrap();

    let base = SegmentProfile::from_entries(vec![SegmentEntry {
        segment_id: 10,
        timestamps: vec![100, 200],
    }]);
    store.put(42, &base, &NullSink).unwrap();
    let delta = SegmentProfile::from_entries(vec![
        SegmentEntry {
            segment_id: 10,
            timestamps: vec![150],
        },
        SegmentEntry {
            segment_id: 20,
            timestamps: vec![300],
        },
    ]);
    store.put(42, &delta, &NullSink).unwrap();

    let merged = store.get(42, &NullSink).unwrap();
    assert_eq!(merged.segment(10), Some(&[100, 150, 200][..]));
    assert_eq!(merged.segment(20), Some(&[300][..]));

    let featurizer_config = FeaturizerConfig::builder()
        .rule(200, 1)
        .dimension_bits(16)
        .build()
        .unwrap();
    let featurizer = vanga::segment::Featurizer::new(featurizer_config);
    let features = featurizer.featurize(&merged, 250);
    assert!(!features.is_empty());
}

#[test]
fn max_iterations_zero_is_idempotent_end_to_end() {
    let matrix = rows_matrix(vec![(vec![1], 1.0), (vec![2], 0.0)]);
    let config = TreeLearnerConfig::builder().max_iterations(0).build().unwrap();
    let learner = TreeLearner::new(&matrix, config);
    let warm_start = Tree::split(1, Tree::leaf(3.0), Tree::leaf(-3.0));
    let tree = learner
        .train(&warm_start, &matrix, &CancelToken::new(), &NullSink)
        .unwrap();
    assert_eq!(tree, warm_start);
}
