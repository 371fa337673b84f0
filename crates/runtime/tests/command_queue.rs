//! Ordering guarantees of a connection's command queue.

use std::time::Duration;

use futures_util::future::join_all;
use hgcs_runtime::fake_session::{FakeEvent, FakeReply, FakeSessionFactory};
use hgcs_runtime::{CommandArgs, Connection, Error, SessionFactory};

/// `wait <ms> <tag>` sleeps for `ms` and echoes `tag`.
fn waiting_factory() -> FakeSessionFactory {
	FakeSessionFactory::new().with_script(|args| {
		let tokens = args.as_slice();
		let ms = tokens.get(1).and_then(|ms| ms.parse().ok()).unwrap_or(0);
		let tag = tokens.get(2).cloned().unwrap_or_default();
		FakeReply::ok([tag]).with_delay(Duration::from_millis(ms))
	})
}

fn begin_end_pairs(events: &[FakeEvent]) -> Vec<(bool, CommandArgs)> {
	events
		.iter()
		.filter_map(|event| match event {
			FakeEvent::Begin { args, .. } => Some((true, args.clone())),
			FakeEvent::End { args, .. } => Some((false, args.clone())),
			_ => None,
		})
		.collect()
}

#[tokio::test(start_paused = true)]
async fn commands_run_in_call_order_without_interleaving() {
	let factory = waiting_factory();
	let conn = Connection::new(factory.create_session(), "/repo");

	let commands: Vec<CommandArgs> = [("30", "a"), ("5", "b"), ("20", "c"), ("1", "d")]
		.into_iter()
		.map(|(ms, tag)| CommandArgs::from(["wait", ms, tag]))
		.collect();
	let pending: Vec<_> = commands.iter().cloned().map(|args| conn.run_command(args)).collect();
	let results = join_all(pending).await;

	let outputs: Vec<Vec<String>> = results.into_iter().map(Result::unwrap).collect();
	assert_eq!(outputs, vec![vec!["a"], vec!["b"], vec!["c"], vec!["d"]]);

	let expected: Vec<(bool, CommandArgs)> = commands.iter().flat_map(|args| [(true, args.clone()), (false, args.clone())]).collect();
	assert_eq!(begin_end_pairs(&factory.log().events), expected);
}

#[tokio::test(start_paused = true)]
async fn callers_on_separate_tasks_never_overlap() {
	let factory = waiting_factory();
	let conn = Connection::new(factory.create_session(), "/repo");

	let tasks: Vec<_> = (0..8)
		.map(|i| {
			let conn = conn.clone();
			tokio::spawn(async move {
				let tag = format!("t{i}");
				let ms = ((i * 7) % 5).to_string();
				let lines = conn.run_command(["wait", ms.as_str(), tag.as_str()]).await.unwrap();
				assert_eq!(lines, vec![tag]);
			})
		})
		.collect();
	for task in tasks {
		task.await.unwrap();
	}

	let pairs = begin_end_pairs(&factory.log().events);
	assert_eq!(pairs.len(), 16);
	for pair in pairs.chunks(2) {
		assert!(pair[0].0 && !pair[1].0, "command began before the previous one ended");
		assert_eq!(pair[0].1, pair[1].1);
	}
}

#[tokio::test(start_paused = true)]
async fn dropped_caller_does_not_stall_the_queue() {
	let factory = waiting_factory();
	let conn = Connection::new(factory.create_session(), "/repo");

	let abandoned = conn.run_command(["wait", "50", "gone"]);
	let kept = conn.run_command(["wait", "10", "kept"]);
	drop(abandoned);

	assert_eq!(kept.await.unwrap(), vec!["kept"]);
	let commands = factory.log().commands();
	assert_eq!(commands.len(), 2, "abandoned command still runs in order");
	assert_eq!(commands[0].as_slice()[2], "gone");
}

#[tokio::test]
async fn crashed_session_fails_queued_commands() {
	let factory = FakeSessionFactory::new().with_script(|args| match args.name() {
		Some("crash") => FakeReply::crashing("helper exited"),
		_ => FakeReply::ok(["ok"]),
	});
	let conn = Connection::new(factory.create_session(), "/repo");

	let crash = conn.run_command("crash");
	let after = conn.run_command("status");

	assert!(matches!(crash.await, Err(Error::SessionTerminated(_))));
	let err = after.await.unwrap_err();
	assert!(err.is_session_failure());
	assert!(conn.is_faulted());
}
