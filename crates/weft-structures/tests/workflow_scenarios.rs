use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use weft_core::artifact::Artifact;
use weft_core::config::WeftConfig;
use weft_core::error::WeftError;
use weft_core::event::{EventKind, EventListener, EventPayload};
use weft_core::traits::{EchoPromptDriver, PromptDriver};
use weft_core::types::TaskState;
use weft_structures::{CodeTask, PromptTask, RunState, TaskNode, Workflow};
use weft_test_utils::{write_config, MockPromptDriver, Probe, ProbeMark, RecordingSink};

const SHORT: Duration = Duration::from_millis(10);
const LONG: Duration = Duration::from_millis(60);

fn prompt(id: &str, template: &str) -> TaskNode {
    let driver: Arc<dyn PromptDriver> = Arc::new(EchoPromptDriver);
    TaskNode::new(PromptTask::new(template, driver)).with_id(id)
}

fn probe_node(probe: &Arc<Probe>, id: &str, delay: Duration) -> TaskNode {
    TaskNode::new(probe.task(delay)).with_id(id)
}

#[tokio::test]
async fn test_linear_chain_passes_outputs() {
    let mut wf = Workflow::new();
    wf.add_tasks(vec![
        prompt("t1", "hello"),
        prompt("t2", "{{ parent_outputs.t1 }} world").with_parent_ids(["t1"]),
        prompt("t3", "{{ parent_outputs.t2 }}!").with_parent_ids(["t2"]),
    ])
    .unwrap();

    let summary = wf.run(vec![]).await.unwrap();

    assert_eq!(summary.state, RunState::Finished);
    assert_eq!(summary.executed, ["t1", "t2", "t3"]);
    assert_eq!(summary.output, Some(Artifact::text("hello world!")));
    assert!(wf.is_finished());
    assert_eq!(wf.run_state(), RunState::Finished);
}

#[tokio::test]
async fn test_diamond_runs_siblings_concurrently() {
    let probe = Probe::new();
    let mut wf = Workflow::new().with_max_workers(4);
    wf.add_tasks(vec![
        probe_node(&probe, "t1", SHORT),
        probe_node(&probe, "t2", LONG).with_parent_ids(["t1"]),
        probe_node(&probe, "t3", LONG).with_parent_ids(["t1"]),
        probe_node(&probe, "t4", SHORT).with_parent_ids(["t2", "t3"]),
    ])
    .unwrap();

    let summary = wf.run(vec![]).await.unwrap();

    assert_eq!(summary.state, RunState::Finished);
    assert!(probe.max_concurrent() >= 2);
    assert_eq!(probe.started()[0], "t1");

    let t4_start = probe.position("t4", ProbeMark::Start).unwrap();
    assert!(probe.position("t2", ProbeMark::Finish).unwrap() < t4_start);
    assert!(probe.position("t3", ProbeMark::Finish).unwrap() < t4_start);
    assert_eq!(summary.executed.last().map(String::as_str), Some("t4"));
}

#[tokio::test]
async fn test_max_workers_bounds_concurrency() {
    let probe = Probe::new();
    let mut wf = Workflow::new().with_max_workers(1);
    wf.add_tasks(vec![
        probe_node(&probe, "a", SHORT),
        probe_node(&probe, "b", SHORT),
        probe_node(&probe, "c", SHORT),
    ])
    .unwrap();

    wf.run(vec![]).await.unwrap();

    assert_eq!(probe.max_concurrent(), 1);
    assert_eq!(probe.finished().len(), 3);
}

#[tokio::test]
async fn test_error_aborts_before_children() {
    let probe = Probe::new();
    let mut wf = Workflow::new();
    wf.add_tasks(vec![
        TaskNode::new(probe.failing_task(SHORT)).with_id("t1"),
        probe_node(&probe, "t2", SHORT).with_parent_ids(["t1"]),
    ])
    .unwrap();

    let summary = wf.run(vec![]).await.unwrap();

    assert_eq!(summary.state, RunState::Aborted);
    assert_eq!(summary.failed_task.as_deref(), Some("t1"));
    assert_eq!(summary.output, Some(Artifact::error("t1 failed")));
    assert!(!probe.has_started("t2"));

    assert_eq!(wf.task("t1").unwrap().state(), TaskState::Errored);
    assert_eq!(wf.task("t2").unwrap().state(), TaskState::Pending);
    assert!(wf.output().is_none());
}

#[tokio::test]
async fn test_panicking_task_aborts_run() {
    let mut wf = Workflow::new();
    wf.add_tasks(vec![
        TaskNode::new(CodeTask::from_fn(|_| panic!("boom"))).with_id("a"),
        prompt("b", "after {{ parent_outputs.a }}").with_parent_ids(["a"]),
    ])
    .unwrap();

    let summary = wf.run(vec![]).await.unwrap();

    assert_eq!(summary.state, RunState::Aborted);
    assert_eq!(summary.executed, ["a"]);
    assert_eq!(summary.failed_task.as_deref(), Some("a"));
    assert_eq!(summary.output, Some(Artifact::error("Task panicked: boom")));
    assert_eq!(wf.task("a").unwrap().state(), TaskState::Errored);
    assert_eq!(wf.task("b").unwrap().state(), TaskState::Pending);
}

#[tokio::test]
async fn test_code_task_error_aborts_run() {
    let mut wf = Workflow::new();
    wf.add_tasks(vec![
        TaskNode::new(CodeTask::new(|_| async {
            Err(WeftError::Prompt("quota exceeded".into()))
        }))
        .with_id("a"),
        prompt("b", "after {{ parent_outputs.a }}").with_parent_ids(["a"]),
    ])
    .unwrap();

    let summary = wf.run(vec![]).await.unwrap();

    assert!(summary.is_aborted());
    assert_eq!(summary.executed, ["a"]);
    let output = summary.output.unwrap();
    assert!(output.is_error());
    assert!(output.to_text().contains("quota exceeded"));
    assert_eq!(wf.task("b").unwrap().state(), TaskState::Pending);
    assert!(!wf.is_executing());
}

#[tokio::test]
async fn test_abort_drains_in_flight_tasks() {
    let probe = Probe::new();
    let mut wf = Workflow::new().with_max_workers(4);
    wf.add_tasks(vec![
        probe_node(&probe, "slow", LONG),
        TaskNode::new(probe.failing_task(SHORT)).with_id("fails"),
        probe_node(&probe, "after", SHORT).with_parent_ids(["fails"]),
    ])
    .unwrap();

    let summary = wf.run(vec![]).await.unwrap();

    assert!(summary.is_aborted());
    assert_eq!(summary.executed, ["fails", "slow"]);
    assert_eq!(wf.task("slow").unwrap().state(), TaskState::Finished);
    assert!(!probe.has_started("after"));
    assert!(!wf.is_executing());
}

#[tokio::test]
async fn test_prompt_driver_failure_aborts() {
    let driver: Arc<dyn PromptDriver> = Arc::new(MockPromptDriver::failing("rate limited"));
    let sink = RecordingSink::new();
    let mut wf = Workflow::new();
    wf.add_event_sink(sink.clone());
    wf.add_task(TaskNode::new(PromptTask::new("hi", driver)).with_id("ask"))
        .unwrap();

    let summary = wf.run(vec![]).await.unwrap();

    assert!(summary.is_aborted());
    let finish_prompt = sink
        .events()
        .into_iter()
        .find_map(|e| match e.payload {
            EventPayload::FinishPrompt { result, .. } => Some(result),
            _ => None,
        })
        .unwrap();
    assert!(finish_prompt.to_text().contains("rate limited"));
}

#[tokio::test]
async fn test_insert_without_preserving_relationship() {
    let probe = Probe::new();
    let mut wf = Workflow::new();
    wf.add_tasks(vec![
        probe_node(&probe, "p", SHORT),
        probe_node(&probe, "c", SHORT).with_parent_ids(["p"]),
    ])
    .unwrap();
    wf.insert_task("p", probe_node(&probe, "n", SHORT), "c", false)
        .unwrap();

    assert_eq!(wf.order_tasks().unwrap(), ["p", "n", "c"]);
    assert_eq!(wf.child_ids("p"), ["n"]);

    wf.run(vec![]).await.unwrap();
    assert_eq!(probe.started(), ["p", "n", "c"]);
}

#[tokio::test]
async fn test_insert_preserving_relationship() {
    let probe = Probe::new();
    let mut wf = Workflow::new();
    wf.add_tasks(vec![
        probe_node(&probe, "p", SHORT),
        probe_node(&probe, "c", SHORT).with_parent_ids(["p"]),
    ])
    .unwrap();
    wf.insert_task("p", probe_node(&probe, "n", SHORT), "c", true)
        .unwrap();

    let parents: Vec<&str> = wf.parents("c").into_iter().map(TaskNode::id).collect();
    assert_eq!(parents, ["p", "n"]);

    wf.run(vec![]).await.unwrap();
    let c_start = probe.position("c", ProbeMark::Start).unwrap();
    assert!(probe.position("n", ProbeMark::Finish).unwrap() < c_start);
}

#[tokio::test]
async fn test_cycle_runs_nothing() {
    let probe = Probe::new();
    let sink = RecordingSink::new();
    let mut wf = Workflow::new();
    wf.add_event_sink(sink.clone());
    wf.add_tasks(vec![
        probe_node(&probe, "a", SHORT).with_parent_ids(["b"]),
        probe_node(&probe, "b", SHORT).with_parent_ids(["a"]),
        probe_node(&probe, "free", SHORT),
    ])
    .unwrap();

    match wf.run(vec![]).await {
        Err(WeftError::Cycle { task_ids }) => assert_eq!(task_ids, ["a", "b"]),
        other => panic!("expected cycle, got {other:?}"),
    }
    assert!(probe.started().is_empty());
    assert!(sink.events().is_empty());
    assert!(wf.tasks().iter().all(TaskNode::is_pending));
}

#[tokio::test]
async fn test_events_in_order() {
    let probe = Probe::new();
    let sink = RecordingSink::new();
    let mut wf = Workflow::new().with_id("wf");
    wf.add_event_sink(sink.clone());
    wf.add_tasks(vec![
        probe_node(&probe, "a", SHORT),
        probe_node(&probe, "b", SHORT).with_parent_ids(["a"]),
    ])
    .unwrap();

    wf.run(vec!["x".into()]).await.unwrap();

    assert_eq!(
        sink.kinds(),
        vec![
            EventKind::StartStructureRun,
            EventKind::StartTask,
            EventKind::FinishTask,
            EventKind::StartTask,
            EventKind::FinishTask,
            EventKind::FinishStructureRun,
        ]
    );
    assert_eq!(sink.flushes(), 1);

    match &sink.events()[0].payload {
        EventPayload::StartStructureRun { structure_id, args } => {
            assert_eq!(structure_id, "wf");
            assert_eq!(args, &["x".to_string()]);
        }
        other => panic!("unexpected first event {other:?}"),
    }
    match &sink.events()[3].payload {
        EventPayload::StartTask {
            task_id, parent_ids, ..
        } => {
            assert_eq!(task_id, "b");
            assert_eq!(parent_ids, &["a".to_string()]);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_filtered_listener_and_removal() {
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = finished.clone();
    let probe = Probe::new();
    let mut wf = Workflow::new();
    let listener = wf.add_event_sink(Arc::new(
        EventListener::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .with_kinds([EventKind::FinishTask]),
    ));
    wf.add_tasks(vec![probe_node(&probe, "a", SHORT), probe_node(&probe, "b", SHORT)])
        .unwrap();

    wf.run(vec![]).await.unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 2);

    assert!(wf.remove_event_sink(&listener));
    wf.run(vec![]).await.unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_args_and_conversation_memory() {
    let file = write_config("[structure]\nmax_workers = 2\nconversation_memory = true\n");
    let config = WeftConfig::load(file.path()).unwrap();
    let mut wf = Workflow::new().with_config(&config.structure);
    assert_eq!(wf.max_workers(), 2);
    wf.add_tasks(vec![
        prompt("ask", "Tell me about {{ args[0] }}"),
        prompt("answer", "{{ parent_outputs.ask | upper }}").with_parent_ids(["ask"]),
    ])
    .unwrap();

    wf.run(vec!["rust".into()]).await.unwrap();
    wf.run(vec!["tokio".into()]).await.unwrap();

    let memory = wf.conversation_memory().unwrap();
    assert_eq!(memory.len(), 2);
    let last = memory.last_run().unwrap();
    assert_eq!(last.input, "Tell me about tokio");
    assert_eq!(last.output, "TELL ME ABOUT TOKIO");
}

#[tokio::test]
async fn test_driver_receives_rendered_prompts() {
    let driver = Arc::new(MockPromptDriver::new("done").with_delay(SHORT));
    let shared: Arc<dyn PromptDriver> = driver.clone();
    let mut wf = Workflow::new();
    wf.add_tasks(vec![
        TaskNode::new(PromptTask::new("plan {{ args[0] }}", shared.clone())).with_id("plan"),
        TaskNode::new(PromptTask::new("act on {{ parent_outputs.plan }}", shared))
            .with_id("act")
            .with_parent_ids(["plan"]),
    ])
    .unwrap();

    let summary = wf.run(vec!["trip".into()]).await.unwrap();

    assert_eq!(summary.output, Some(Artifact::text("done")));
    assert_eq!(driver.prompts(), ["plan trip", "act on done"]);
}
