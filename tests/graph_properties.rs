// tests/graph_properties.rs

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use jobdag::dag::DagGraph;
use jobdag::job::{Job, Locator};
use jobdag::token::CounterToken;
use jobdag::types::JobState;
use jobdag::workspace::{WaitOutcome, Workspace, WorkspaceOptions};
use jobdag_test_utils::fake_body::{RecordingBody, RunLog};

/// Random DAG: job N may only depend on jobs 0..N, so the graph is acyclic.
fn dag_strategy(max_jobs: usize) -> impl Strategy<Value = Vec<BTreeSet<usize>>> {
    (1..=max_jobs).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), n).prop_map(
            |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        if i == 0 {
                            BTreeSet::new()
                        } else {
                            deps.into_iter().map(|d| d % i).collect()
                        }
                    })
                    .collect()
            },
        )
    })
}

fn name(i: usize) -> String {
    format!("job_{i:02}")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn topological_order_respects_every_edge(deps in dag_strategy(12)) {
        let names: Vec<String> = (0..deps.len()).map(name).collect();
        let afters: Vec<Vec<String>> = deps
            .iter()
            .map(|ds| ds.iter().map(|&d| name(d)).collect())
            .collect();
        let graph = DagGraph::from_edges(
            names.iter().map(String::as_str).zip(afters.iter().map(Vec::as_slice)),
        );
        let order = graph.topological_order().unwrap();
        prop_assert_eq!(order.len(), deps.len());

        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(p, n)| (*n, p)).collect();
        for (i, ds) in deps.iter().enumerate() {
            for &d in ds {
                prop_assert!(position[name(d).as_str()] < position[name(i).as_str()]);
            }
        }
    }

    #[test]
    fn every_job_runs_once_after_its_dependencies(
        deps in dag_strategy(10),
        submit_seed in any::<u64>(),
        token_limit in 1u32..3,
    ) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let log = RunLog::new();
        let dir = tempfile::tempdir().unwrap();
        let token = CounterToken::new(token_limit);

        let jobs: Vec<Arc<Job>> = (0..deps.len())
            .map(|i| {
                Job::new(
                    Locator::new(name(i)).unwrap(),
                    RecordingBody::new(&name(i), &log).delay(Duration::from_millis(1)),
                )
            })
            .collect();
        for (i, ds) in deps.iter().enumerate() {
            for &d in ds {
                jobs[i].depends_on(&jobs[d]).unwrap();
            }
            if i % 2 == 0 {
                jobs[i].requires(&token, 1).unwrap();
            }
        }

        // Submit in a scrambled order.
        let mut order: Vec<usize> = (0..jobs.len()).collect();
        let shift = (submit_seed as usize) % order.len();
        order.rotate_left(shift);
        if submit_seed % 2 == 1 {
            order.reverse();
        }

        let outcome = rt.block_on(async {
            let ws = Workspace::with_options(dir.path(), WorkspaceOptions { max_jobs: 3 }).unwrap();
            for &i in &order {
                ws.submit(Arc::clone(&jobs[i])).unwrap();
            }
            tokio::time::timeout(Duration::from_secs(10), ws.wait()).await
        });

        prop_assert_eq!(outcome, Ok(WaitOutcome::Completed));
        prop_assert!(jobs.iter().all(|j| j.state() == JobState::Done));
        prop_assert!(log.started_early().is_empty());
        prop_assert!(log.counts().values().all(|&n| n == 1));
        prop_assert_eq!(log.counts().len(), jobs.len());
        prop_assert_eq!(token.used(), 0);

        let started = log.started();
        let position: HashMap<&str, usize> =
            started.iter().enumerate().map(|(p, n)| (n.as_str(), p)).collect();
        for (i, ds) in deps.iter().enumerate() {
            for &d in ds {
                prop_assert!(position[name(d).as_str()] < position[name(i).as_str()]);
            }
        }
    }
}
