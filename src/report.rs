use serde::Serialize;
use std::time::Duration;

use crate::stressor::ExitStatus;

#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub instance: u32,
    pub status: ExitStatus,
    pub bogo_ops: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stressor: &'static str,
    pub instances: u32,
    pub bogo_ops: u64,
    pub duration_secs: f64,
    pub bogo_ops_per_sec: f64,
    pub status: ExitStatus,
    pub per_instance: Vec<InstanceReport>,
}

impl RunReport {
    /// Aggregates per-instance results; the overall status is the worst one.
    pub fn new(stressor: &'static str, elapsed: Duration, mut per_instance: Vec<InstanceReport>) -> Self {
        per_instance.sort_by_key(|r| r.instance);
        let bogo_ops = per_instance.iter().map(|r| r.bogo_ops).sum();
        let status = per_instance
            .iter()
            .map(|r| r.status)
            .max()
            .unwrap_or(ExitStatus::Success);
        let duration_secs = elapsed.as_secs_f64();
        let bogo_ops_per_sec = if duration_secs > 0.0 {
            bogo_ops as f64 / duration_secs
        } else {
            0.0
        };

        Self {
            stressor,
            instances: per_instance.len() as u32,
            bogo_ops,
            duration_secs,
            bogo_ops_per_sec,
            status,
            per_instance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_status_wins_and_ops_are_summed() {
        let report = RunReport::new(
            "dev",
            Duration::from_secs(2),
            vec![
                InstanceReport {
                    instance: 1,
                    status: ExitStatus::NoResource,
                    bogo_ops: 10,
                },
                InstanceReport {
                    instance: 0,
                    status: ExitStatus::Success,
                    bogo_ops: 30,
                },
            ],
        );
        assert_eq!(report.status, ExitStatus::NoResource);
        assert_eq!(report.bogo_ops, 40);
        assert_eq!(report.bogo_ops_per_sec, 20.0);
        assert_eq!(report.per_instance[0].instance, 0);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "no_resource");
        assert_eq!(json["per_instance"][1]["bogo_ops"], 10);
    }

    #[test]
    fn failure_outranks_everything() {
        let statuses = [
            ExitStatus::Success,
            ExitStatus::NotImplemented,
            ExitStatus::NoResource,
            ExitStatus::Failure,
        ];
        let per_instance = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| InstanceReport {
                instance: i as u32,
                status: *s,
                bogo_ops: 0,
            })
            .collect();
        let report = RunReport::new("dev", Duration::ZERO, per_instance);
        assert_eq!(report.status, ExitStatus::Failure);
        assert_eq!(report.bogo_ops_per_sec, 0.0);
    }
}
