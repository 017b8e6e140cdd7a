//! Process span and per-run correlation.
//!
//! The run id is task-local, so adapter log lines emitted deep inside a pass
//! can be tied back to it without threading the id through every call.

use std::future::Future;

use tracing::{Span, field, span::Entered};
use uuid::Uuid;

use crate::init::build_sha;

tokio::task_local! {
    static ACTIVE_RUN: Uuid;
}

/// Keeps the `torset` process span entered until dropped.
pub struct GlobalContextGuard {
    _entered: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the process span tagged with `mode` and the build SHA.
    #[must_use]
    pub fn new(mode: impl Into<String>) -> Self {
        let mode = mode.into();
        let span: &'static Span = Box::leak(Box::new(tracing::info_span!(
            "torset",
            mode = %mode,
            build_sha = %build_sha()
        )));
        Self {
            _entered: span.enter(),
        }
    }
}

/// Overwrite the `mode` field of the current span once the schedule is known.
pub fn record_app_mode(mode: &str) {
    Span::current().record("mode", field::display(mode));
}

/// Run id of the pass the current task is executing, if any.
#[must_use]
pub fn current_run_id() -> Option<Uuid> {
    ACTIVE_RUN.try_with(|run_id| *run_id).ok()
}

/// Drive `fut` with `run_id` visible through [`current_run_id`].
pub async fn with_run_context<Fut, T>(run_id: Uuid, fut: Fut) -> T
where
    Fut: Future<Output = T>,
{
    ACTIVE_RUN.scope(run_id, fut).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_span_accepts_mode_updates() {
        let guard = GlobalContextGuard::new("starting");
        record_app_mode("scheduled");
        drop(guard);
    }

    #[tokio::test]
    async fn run_id_is_only_visible_inside_the_scope() {
        let run_id = Uuid::new_v4();
        let seen = with_run_context(run_id, async { current_run_id() }).await;
        assert_eq!(seen, Some(run_id));
        assert!(current_run_id().is_none());
    }

    #[tokio::test]
    async fn nested_scopes_shadow_the_outer_run() {
        let outer = Uuid::new_v4();
        let inner = Uuid::new_v4();
        let seen = with_run_context(outer, async move {
            let nested = with_run_context(inner, async { current_run_id() }).await;
            (nested, current_run_id())
        })
        .await;
        assert_eq!(seen, (Some(inner), Some(outer)));
    }
}
