//! Cron-driven trigger loop.
//!
//! 5-field expressions are auto-prefixed with a seconds field for the `cron`
//! crate's 6-field requirement.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tracing::{info, warn};

/// Parse a cron expression, auto-prepending `"0 "` for 5-field expressions.
pub fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() == 5 {
        Schedule::from_str(&format!("0 {expr}"))
    } else {
        Schedule::from_str(expr)
    }
}

/// Drive one cron-scheduled job until `shutdown` fires.
///
/// Deliberately a single sequential loop, not a tick timer with a separate
/// "is it still running" flag: `job` is awaited to completion before the next
/// fire time is computed, so a slow run can never overlap with itself, and any
/// cron fire that would have landed mid-run is simply absent from the next
/// `schedule.upcoming(Utc)` call — if a long-running job is still active when
/// the next trigger fires, that trigger is skipped, not queued.
pub async fn run_cron_loop<F, Fut>(
    job_name: &str,
    cron_expr: &str,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let schedule = match parse_cron(cron_expr) {
        Ok(s) => s,
        Err(e) => {
            warn!(job_name, cron_expr, error = %e, "invalid cron expression — job disabled");
            return;
        }
    };
    info!(job_name, cron_expr, "batch job scheduled");

    loop {
        let Some(next_fire) = schedule.upcoming(Utc).next() else {
            warn!(job_name, "cron schedule produced no upcoming fire time — job disabled");
            return;
        };
        let wait = (next_fire - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        info!(job_name, "batch job triggered");
        job().await;
    }
    info!(job_name, "batch job stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_expression_is_auto_prefixed() {
        let schedule = parse_cron("5 * * * *").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }

    #[test]
    fn six_field_expression_is_used_as_is() {
        let schedule = parse_cron("0 5 * * * *").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }

    #[test]
    fn malformed_expression_is_rejected() {
        assert!(parse_cron("not a cron expr").is_err());
    }
}
