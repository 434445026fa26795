// tests/config_loading.rs

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use jobdag::build_graph;
use jobdag::config::{load_and_validate, load_from_path, parse_duration, WorkflowFile};
use jobdag::dag::WorkPayload;
use jobdag::errors::{GraphError, JobdagError};
use jobdag::types::BackendKind;
use jobdag_test_utils::builders::{TaskConfigBuilder, WorkflowFileBuilder};

type TestResult = Result<(), Box<dyn Error>>;

fn write_workflow(contents: &str) -> Result<(tempfile::TempDir, PathBuf), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Jobdag.toml");
    fs::write(&path, contents)?;
    Ok((dir, path))
}

const PIPELINE: &str = r#"
name = "training-pipeline"

[config]
max_concurrency = 2
backend = "local"
poll_interval = "250ms"

[default]
log_dir = "out/logs"
partition = "cpu"

[[task]]
name = "preprocess"
command = ["python", "prep.py"]
conda = "ml"
env_vars = { STAGE = "prep" }

[[task]]
name = "train"
command = ["python", "train.py"]
depends_on = ["preprocess"]
gpus_per_node = 2
partition = "gpu"
container = "/images/torch.sqsh"

[[task]]
name = "report"
path = "scripts/report.sh"
depends_on = ["train"]
"#;

#[test]
fn full_workflow_loads() -> TestResult {
    let (_dir, path) = write_workflow(PIPELINE)?;
    let workflow = load_and_validate(&path)?;

    assert_eq!(workflow.name, "training-pipeline");
    assert_eq!(workflow.config.max_concurrency, 2);
    assert_eq!(workflow.config.backend, BackendKind::Local);
    assert_eq!(workflow.poll_interval(), Duration::from_millis(250));

    let descriptors = workflow.descriptors();
    assert_eq!(descriptors.len(), 3);

    let WorkPayload::Command(prep) = &descriptors[0].payload else {
        panic!("preprocess should be a command task");
    };
    assert_eq!(prep.argv, vec!["python", "prep.py"]);
    assert_eq!(prep.log_dir, "out/logs");
    assert_eq!(prep.partition.as_deref(), Some("cpu"));
    assert_eq!(prep.environment.conda.as_deref(), Some("ml"));
    assert_eq!(prep.environment.env_vars.get("STAGE").map(String::as_str), Some("prep"));

    let WorkPayload::Command(train) = &descriptors[1].payload else {
        panic!("train should be a command task");
    };
    assert_eq!(train.resources.gpus_per_node, 2);
    assert_eq!(train.partition.as_deref(), Some("gpu"));
    assert_eq!(train.environment.sqsh.as_deref(), Some("/images/torch.sqsh"));
    assert_eq!(descriptors[1].depends_on, vec!["preprocess"]);

    assert!(matches!(&descriptors[2].payload, WorkPayload::Script(s) if s.path == PathBuf::from("scripts/report.sh")));

    let graph = build_graph(descriptors)?;
    assert_eq!(graph.roots().collect::<Vec<_>>(), vec!["preprocess"]);
    Ok(())
}

#[test]
fn defaults_apply_when_sections_are_missing() -> TestResult {
    let (_dir, path) = write_workflow(
        r#"
[[task]]
name = "only"
command = ["true"]
"#,
    )?;
    let workflow = load_and_validate(&path)?;

    assert_eq!(workflow.name, "unnamed_workflow");
    assert_eq!(workflow.config.max_concurrency, 4);
    assert_eq!(workflow.config.backend, BackendKind::Slurm);
    assert_eq!(workflow.poll_interval(), Duration::from_secs(5));

    let WorkPayload::Command(work) = &workflow.descriptors()[0].payload else {
        panic!("expected a command task");
    };
    assert_eq!(work.log_dir, "logs");
    assert_eq!(work.resources.nodes, 1);
    assert_eq!(work.resources.cpus_per_task, 1);
    Ok(())
}

fn expect_config_error(contents: &str, needle: &str) -> TestResult {
    let (_dir, path) = write_workflow(contents)?;
    match load_and_validate(&path) {
        Err(JobdagError::ConfigError(msg)) => {
            assert!(msg.contains(needle), "message `{msg}` does not mention `{needle}`");
            Ok(())
        }
        other => panic!("expected ConfigError mentioning `{needle}`, got {other:?}"),
    }
}

#[test]
fn invalid_workflows_are_rejected() -> TestResult {
    expect_config_error("name = \"empty\"\n", "at least one")?;
    expect_config_error(
        "[[task]]\nname = \"a\"\ncommand = [\"x\"]\npath = \"x.sh\"\n",
        "both",
    )?;
    expect_config_error("[[task]]\nname = \"a\"\n", "either")?;
    expect_config_error("[[task]]\nname = \"a\"\ncommand = []\n", "empty `command`")?;
    expect_config_error("[[task]]\nname = \"  \"\ncommand = [\"x\"]\n", "non-empty")?;
    expect_config_error(
        "[[task]]\nname = \"a\"\ncommand = [\"x\"]\nnodes = 0\n",
        "nodes",
    )?;
    expect_config_error(
        "[[task]]\nname = \"a\"\ncommand = [\"x\"]\nconda = \"e\"\nvenv = \"v\"\n",
        "at most one",
    )?;
    expect_config_error(
        "[config]\nmax_concurrency = 0\n[[task]]\nname = \"a\"\ncommand = [\"x\"]\n",
        "max_concurrency",
    )?;
    expect_config_error(
        "[config]\npoll_interval = \"soon\"\n[[task]]\nname = \"a\"\ncommand = [\"x\"]\n",
        "poll_interval",
    )?;
    expect_config_error(
        "[config]\npoll_interval = \"9999999999999999999h\"\n[[task]]\nname = \"a\"\ncommand = [\"x\"]\n",
        "too large",
    )?;
    expect_config_error(
        "[[task]]\nname = \"a\"\ncommand = [\"x\"]\nenv_vars = { \"A; rm -rf /\" = \"1\" }\n",
        "not a valid identifier",
    )?;
    Ok(())
}

#[test]
fn malformed_toml_and_missing_files_surface_as_errors() -> TestResult {
    let (_dir, path) = write_workflow("[[task]\nname = ")?;
    assert!(matches!(load_from_path(&path), Err(JobdagError::TomlError(_))));

    let missing = PathBuf::from("/definitely/not/here/Jobdag.toml");
    assert!(matches!(load_and_validate(&missing), Err(JobdagError::IoError(_))));

    let (_dir, path) = write_workflow("[config]\nbackend = \"kubernetes\"\n")?;
    assert!(matches!(load_from_path(&path), Err(JobdagError::TomlError(_))));
    Ok(())
}

#[test]
fn dependency_errors_are_left_to_the_graph() -> TestResult {
    let workflow: WorkflowFile = WorkflowFileBuilder::new("dangling")
        .with_task(TaskConfigBuilder::command("a", &["true"]).after("ghost").build())
        .build();

    let err = build_graph(workflow.descriptors()).unwrap_err();
    assert_eq!(
        err,
        GraphError::UnknownDependency {
            task: "a".to_string(),
            dependency: "ghost".to_string(),
        }
    );
    Ok(())
}

#[test]
fn builder_defaults_flow_into_payloads() -> TestResult {
    let workflow = WorkflowFileBuilder::new("built")
        .with_default_log_dir("/var/log/jobs")
        .with_max_concurrency(8)
        .with_task(TaskConfigBuilder::command("a", &["true"]).venv("/env").env_var("K", "V").build())
        .with_task(TaskConfigBuilder::script("b", "run.sh").after("a").build())
        .build();

    assert_eq!(workflow.config.max_concurrency, 8);
    let descriptors = workflow.descriptors();
    let WorkPayload::Command(a) = &descriptors[0].payload else {
        panic!("expected a command task");
    };
    assert_eq!(a.log_dir, "/var/log/jobs");
    assert_eq!(a.environment.venv.as_deref(), Some("/env"));
    assert_eq!(descriptors[1].depends_on, vec!["a"]);
    Ok(())
}

#[test]
fn durations_parse() {
    assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
    assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
    assert_eq!(parse_duration(" 2m "), Ok(Duration::from_secs(120)));
    assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("5d").is_err());
    assert!(parse_duration("ms").is_err());
    assert!(parse_duration("9999999999999999999h").is_err());
    assert!(parse_duration("18446744073709551615m").is_err());
}
