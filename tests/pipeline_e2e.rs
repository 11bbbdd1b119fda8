// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! End-to-end pipeline runs against stub bioinformatics tools
//!
//! Each stub is a small bash script that honors the real tool's argument
//! contract just enough to leave the declared outputs behind (or fail on
//! cue). The whole scheduler path runs for real: process spawning, the
//! alignment pipe, artifact registration, skip cascades, and the manifest.

use magflow::pipeline::{ArtifactOutcome, RunBundle, Sample, Scheduler, StageResults, TaskStatus};
use magflow::stages::{build_pipeline, PipelineKind, PipelineParams, TaxonomyParams};
use magflow::tools::Toolchain;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const TOOLS: [&str; 15] = [
    "megahit",
    "metaquast.py",
    "bowtie2-build",
    "bowtie2",
    "samtools",
    "jgi_summarize_bam_contig_depths",
    "metabat2",
    "kaiju",
    "kaiju2table",
    "kaiju2krona",
    "ktImportText",
    "prodigal",
    "macrel",
    "fargene",
    "gecco",
];

fn stub(bin: &Path, name: &str, body: &str) {
    let path = bin.join(name);
    fs::write(
        &path,
        format!("#!/usr/bin/env bash\nset -euo pipefail\n{body}\n"),
    )
    .unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
}

/// Install a happy-path stub for every tool in the catalogue
fn install_stubs(bin: &Path) {
    stub(
        bin,
        "megahit",
        r#"dir=""; prefix=""
while [ $# -gt 0 ]; do
  case "$1" in
    --out-dir) dir="$2"; shift 2 ;;
    --out-prefix) prefix="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$dir"
printf '>contig_1\nACGTACGTACGT\n' > "$dir/$prefix.contigs.fa""#,
    );
    stub(
        bin,
        "metaquast.py",
        r#"out=""; label=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -l) label="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$out"
printf 'assembly\t%s\n' "$label" > "$out/report.tsv""#,
    );
    stub(bin, "bowtie2-build", r#"touch "$2.1.bt2""#);
    stub(
        bin,
        "bowtie2",
        r#"printf '@HD\tVN:1.6\nread_1\t0\tcontig_1\t1\t42\t12M\t*\t0\t0\tACGTACGTACGT\tIIIIIIIIIIII\n'"#,
    );
    stub(
        bin,
        "samtools",
        r#"sub="$1"; shift
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ "$sub" = "sort" ]; then
  cat > "$out"
else
  cat
fi"#,
    );
    stub(
        bin,
        "jgi_summarize_bam_contig_depths",
        r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outputDepth) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf 'contigName\tcontigLen\ttotalAvgDepth\n' > "$out""#,
    );
    stub(
        bin,
        "metabat2",
        r#"prefix=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) prefix="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$(dirname "$prefix")"
printf '>binned_contig\nACGT\n' > "${prefix}.1.fa""#,
    );
    stub(
        bin,
        "kaiju",
        r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf 'C\tread_1\t1280\n' > "$out""#,
    );
    stub(
        bin,
        "kaiju2table",
        r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf 'file\tpercent\treads\ttaxon_id\ttaxon_name\n' > "$out""#,
    );
    stub(
        bin,
        "kaiju2krona",
        r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf '5\tBacteria\tBacillota\n' > "$out""#,
    );
    stub(
        bin,
        "ktImportText",
        r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf '<html>krona</html>\n' > "$out""#,
    );
    stub(
        bin,
        "prodigal",
        r#"out=""; faa=""; fna=""; cds=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -a) faa="$2"; shift 2 ;;
    -d) fna="$2"; shift 2 ;;
    -s) cds="$2"; shift 2 ;;
    *) shift ;;
  esac
done
touch "$out" "$faa" "$fna" "$cds""#,
    );
    stub(
        bin,
        "macrel",
        r#"out=""; log=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2 ;;
    --log-file) log="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$out"
touch "$log""#,
    );
    stub(
        bin,
        "fargene",
        r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$out"
printf 'predicted-genes\n' > "$out/results_summary.txt""#,
    );
    stub(
        bin,
        "gecco",
        r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$out"
printf 'sequence_id\tbgc_id\n' > "$out/clusters.tsv""#,
    );
}

fn toolchain_for(bin: &Path) -> Toolchain {
    let mut toolchain = Toolchain::new();
    for tool in TOOLS {
        toolchain = toolchain.with_override(tool, bin.join(tool));
    }
    toolchain
}

fn write_sample_batch(dir: &Path) -> Vec<Sample> {
    let samples = vec![
        Sample::new("gut_a", dir.join("gut_a_1.fq"), dir.join("gut_a_2.fq")),
        Sample::new("gut_b", dir.join("gut_b_1.fq"), dir.join("gut_b_2.fq")),
    ];
    for sample in &samples {
        fs::write(&sample.read1, b"@r1\nACGTACGTACGT\n+\nIIIIIIIIIIII\n").unwrap();
        fs::write(&sample.read2, b"@r2\nACGTACGTACGT\n+\nIIIIIIIIIIII\n").unwrap();
    }
    samples
}

fn test_params(dir: &Path) -> PipelineParams {
    PipelineParams::default()
        .with_threads(2)
        .with_taxonomy(TaxonomyParams::new(
            dir.join("kaiju_db.fmi"),
            dir.join("nodes.dmp"),
            dir.join("names.dmp"),
        ))
}

struct TestRun {
    _dir: tempfile::TempDir,
    bin: PathBuf,
    run_root: PathBuf,
    samples: Vec<Sample>,
    params: PipelineParams,
}

fn init_logs() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "magflow=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_test_writer(),
        )
        .try_init();
}

fn setup() -> TestRun {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    fs::create_dir(&bin).unwrap();
    install_stubs(&bin);
    let samples = write_sample_batch(dir.path());
    let params = test_params(dir.path());
    let run_root = dir.path().join("run");
    TestRun {
        bin,
        run_root,
        samples,
        params,
        _dir: dir,
    }
}

fn per_sample_outcome<'a>(bundle: &'a RunBundle, stage: &str, sample: &str) -> &'a ArtifactOutcome {
    match bundle.stage(stage).unwrap() {
        StageResults::PerSample { samples } => &samples[sample],
        other => panic!("{stage} is not per-sample: {other:?}"),
    }
}

fn task_status(bundle: &RunBundle, stage: &str, sample: Option<&str>) -> TaskStatus {
    bundle
        .tasks
        .iter()
        .find(|t| t.stage == stage && t.sample.as_deref() == sample)
        .unwrap()
        .status
}

#[tokio::test]
async fn full_pipeline_runs_end_to_end() {
    let run = setup();
    let graph = build_pipeline(PipelineKind::Full, &run.params).unwrap();

    let bundle = Scheduler::new()
        .with_toolchain(toolchain_for(&run.bin))
        .with_max_parallel(4)
        .run(&graph, &run.samples, &run.run_root)
        .await
        .unwrap();

    assert!(bundle.success);
    assert_eq!(bundle.pipeline, "full");
    // 14 per-sample stages over 2 samples, plus the aggregate chart
    assert_eq!(bundle.tasks.len(), 29);
    assert!(bundle
        .tasks
        .iter()
        .all(|t| t.status == TaskStatus::Succeeded && t.duration_ms.is_some()));

    let keys: Vec<&str> = bundle.stages.keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        [
            "amp_screening",
            "bgc_detection",
            "binning",
            "classification_table",
            "gene_prediction",
            "krona_plot",
            "krona_summary",
            "resistance_screening",
        ]
    );

    // Stage products landed where the instance workdirs say they should
    assert!(run
        .run_root
        .join("assembly/gut_a/MEGAHIT/gut_a.contigs.fa")
        .is_file());
    assert!(run
        .run_root
        .join("read_alignment/gut_b/gut_b_assembly_sorted.bam")
        .is_file());
    assert!(run.run_root.join("binning/gut_a/METABAT/gut_a.1.fa").is_file());
    assert!(run
        .run_root
        .join("gene_prediction/gut_a/prodigal_results/gut_a.gbk")
        .is_file());
    assert!(run
        .run_root
        .join("krona_summary/aggregate/all_samples_krona.html")
        .is_file());

    match per_sample_outcome(&bundle, "binning", "gut_b") {
        ArtifactOutcome::Present { artifacts } => {
            assert_eq!(artifacts.len(), 1);
            assert!(artifacts[0].path.is_absolute());
            assert!(artifacts[0].path.ends_with("METABAT"));
        }
        other => panic!("unexpected: {other:?}"),
    }

    // The manifest on disk is the bundle, byte for byte semantically
    let manifest = fs::read_to_string(run.run_root.join("manifest.json")).unwrap();
    let parsed: RunBundle = serde_json::from_str(&manifest).unwrap();
    assert_eq!(parsed, bundle);
}

#[tokio::test]
async fn assembler_failure_skips_its_cone_but_not_taxonomy() {
    let run = setup();
    // Same contract, but the gut_b instance falls over
    stub(
        &run.bin,
        "megahit",
        r#"dir=""; prefix=""
while [ $# -gt 0 ]; do
  case "$1" in
    --out-dir) dir="$2"; shift 2 ;;
    --out-prefix) prefix="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ "$prefix" = "gut_b" ]; then
  echo "assembler scratch collision" >&2
  exit 1
fi
mkdir -p "$dir"
printf '>contig_1\nACGTACGTACGT\n' > "$dir/$prefix.contigs.fa""#,
    );
    let graph = build_pipeline(PipelineKind::Full, &run.params).unwrap();

    let bundle = Scheduler::new()
        .with_toolchain(toolchain_for(&run.bin))
        .with_max_parallel(4)
        .run(&graph, &run.samples, &run.run_root)
        .await
        .unwrap();

    assert!(!bundle.success);

    // The failing instance carries the tool error and its stderr
    let failed = bundle
        .tasks
        .iter()
        .find(|t| t.stage == "assembly" && t.sample.as_deref() == Some("gut_b"))
        .unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    let error = failed.error.as_deref().unwrap();
    assert!(error.contains("exit code 1"));
    assert!(error.contains("assembler scratch collision"));

    // Everything downstream of gut_b's assembly is skipped, not failed
    for stage in [
        "assembly_eval",
        "contig_index",
        "read_alignment",
        "contig_depths",
        "binning",
        "gene_prediction",
        "amp_screening",
        "resistance_screening",
        "bgc_detection",
    ] {
        assert_eq!(
            task_status(&bundle, stage, Some("gut_b")),
            TaskStatus::Skipped,
            "{stage}"
        );
    }

    // gut_a is untouched
    assert!(matches!(
        per_sample_outcome(&bundle, "binning", "gut_a"),
        ArtifactOutcome::Present { .. }
    ));

    // The read-based taxonomy chain never depended on the assembler
    assert_eq!(
        task_status(&bundle, "classification_table", Some("gut_b")),
        TaskStatus::Succeeded
    );
    assert!(matches!(
        bundle.stage("krona_summary").unwrap(),
        StageResults::Aggregate {
            outcome: ArtifactOutcome::Present { .. }
        }
    ));

    match per_sample_outcome(&bundle, "amp_screening", "gut_b") {
        ArtifactOutcome::Skipped { cause } => assert_eq!(cause, "assembly[gut_b]"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn evaluation_failure_blocks_binning_but_not_the_screens() {
    let run = setup();
    stub(
        &run.bin,
        "metaquast.py",
        r#"out=""; label=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -l) label="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ "$label" = "gut_b" ]; then
  echo "could not parse contigs" >&2
  exit 1
fi
mkdir -p "$out"
printf 'assembly\t%s\n' "$label" > "$out/report.tsv""#,
    );
    let graph = build_pipeline(PipelineKind::Full, &run.params).unwrap();

    let bundle = Scheduler::new()
        .with_toolchain(toolchain_for(&run.bin))
        .with_max_parallel(4)
        .run(&graph, &run.samples, &run.run_root)
        .await
        .unwrap();

    assert!(!bundle.success);
    assert_eq!(
        task_status(&bundle, "assembly_eval", Some("gut_b")),
        TaskStatus::Failed
    );

    // Binning follows the evaluated assembly, so the whole sub-chain waits
    // on the evaluation and skips with it
    for stage in ["contig_index", "read_alignment", "contig_depths", "binning"] {
        assert_eq!(
            task_status(&bundle, stage, Some("gut_b")),
            TaskStatus::Skipped,
            "{stage}"
        );
    }
    match per_sample_outcome(&bundle, "gene_prediction", "gut_b") {
        ArtifactOutcome::Skipped { cause } => assert_eq!(cause, "assembly_eval[gut_b]"),
        other => panic!("unexpected: {other:?}"),
    }

    // The standalone screens only need the contigs themselves
    for stage in ["amp_screening", "resistance_screening", "bgc_detection"] {
        assert!(
            matches!(
                per_sample_outcome(&bundle, stage, "gut_b"),
                ArtifactOutcome::Present { .. }
            ),
            "{stage}"
        );
    }
    assert!(matches!(
        per_sample_outcome(&bundle, "binning", "gut_a"),
        ArtifactOutcome::Present { .. }
    ));
}

#[tokio::test]
async fn krona_text_failure_skips_the_combined_chart() {
    let run = setup();
    stub(
        &run.bin,
        "kaiju2krona",
        r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
case "$out" in
  gut_b*)
    echo "no classified reads" >&2
    exit 1
    ;;
esac
printf '5\tBacteria\tBacillota\n' > "$out""#,
    );
    let graph = build_pipeline(PipelineKind::AssemblyBinningTaxonomy, &run.params).unwrap();

    let bundle = Scheduler::new()
        .with_toolchain(toolchain_for(&run.bin))
        .with_max_parallel(4)
        .run(&graph, &run.samples, &run.run_root)
        .await
        .unwrap();

    assert!(!bundle.success);
    assert_eq!(
        task_status(&bundle, "krona_text", Some("gut_b")),
        TaskStatus::Failed
    );

    // One sample's chart still renders; the batch-wide chart cannot
    assert!(matches!(
        per_sample_outcome(&bundle, "krona_plot", "gut_a"),
        ArtifactOutcome::Present { .. }
    ));
    match bundle.stage("krona_summary").unwrap() {
        StageResults::Aggregate {
            outcome: ArtifactOutcome::Skipped { cause },
        } => assert_eq!(cause, "krona_text[gut_b]"),
        other => panic!("unexpected: {other:?}"),
    }

    // Assembly and binning are a different cone entirely
    assert!(matches!(
        per_sample_outcome(&bundle, "binning", "gut_b"),
        ArtifactOutcome::Present { .. }
    ));
}

#[tokio::test]
async fn assembly_variant_reports_only_the_evaluation() {
    let run = setup();
    let graph = build_pipeline(PipelineKind::Assembly, &run.params).unwrap();

    let bundle = Scheduler::new()
        .with_toolchain(toolchain_for(&run.bin))
        .run(&graph, &run.samples, &run.run_root)
        .await
        .unwrap();

    assert!(bundle.success);
    assert_eq!(bundle.pipeline, "assembly");
    assert_eq!(bundle.tasks.len(), 4);
    let keys: Vec<&str> = bundle.stages.keys().map(String::as_str).collect();
    assert_eq!(keys, ["assembly_eval"]);
    assert!(run
        .run_root
        .join("assembly_eval/gut_a/MetaQuast/report.tsv")
        .is_file());
}

#[tokio::test]
async fn missing_binary_aborts_before_any_instance() {
    let run = setup();
    // No override for megahit and nothing on PATH by that name
    let mut toolchain = Toolchain::new();
    for tool in TOOLS.iter().filter(|t| **t != "megahit") {
        toolchain = toolchain.with_override(*tool, run.bin.join(tool));
    }
    let graph = build_pipeline(PipelineKind::Full, &run.params).unwrap();

    let err = Scheduler::new()
        .with_toolchain(toolchain)
        .run(&graph, &run.samples, &run.run_root)
        .await
        .unwrap_err();

    assert!(matches!(err, magflow::MagflowError::ToolNotFound { .. }));
    assert!(!run.run_root.exists());
}
