//! Off-track reports.
//!
//! Client-side detectors tell us when a car is off the racing surface or driving
//! against the flow; each report simply holds or releases the `off_track` reason.

use noclip_types::{OffTrackReport, Reason};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::Coordinator;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OffTrackConfig {
    pub enabled: bool,
}

impl Default for OffTrackConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

pub struct OffTrackMonitor {
    config: OffTrackConfig,
    coordinator: Arc<Coordinator>,
}

impl OffTrackMonitor {
    pub fn new(config: OffTrackConfig, coordinator: Arc<Coordinator>) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    /// Apply a report. Returns whether the reason set changed.
    pub fn on_report(&self, report: &OffTrackReport) -> bool {
        let entity = report.entity;
        if !self.config.enabled {
            trace!(%entity, "off-track handling disabled");
            return false;
        }

        let changed = if report.disable_collisions {
            self.coordinator.request(entity, Reason::OffTrack)
        } else {
            self.coordinator.clear(entity, Reason::OffTrack)
        };
        if changed {
            debug!(
                %entity,
                ghosted = report.disable_collisions,
                wheels_out = report.wheels_out,
                wrong_direction = report.wrong_direction,
                label = %report.reason_label,
                "off-track state changed"
            );
        }
        changed
    }

    pub fn on_session_change(&self) {
        let cleared = self.coordinator.clear_reason_everywhere(Reason::OffTrack);
        trace!(cleared, "off-track reasons cleared for new session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MemoryHost;
    use noclip_types::EntityId;

    const CAR: EntityId = EntityId(3);

    fn report(disable_collisions: bool) -> OffTrackReport {
        OffTrackReport {
            entity: CAR,
            wheels_out: if disable_collisions { 4 } else { 0 },
            wrong_direction: false,
            disable_collisions,
            reason_label: "gravel".to_string(),
        }
    }

    fn setup(enabled: bool) -> (Arc<MemoryHost>, Arc<Coordinator>, OffTrackMonitor) {
        let host = Arc::new(MemoryHost::new());
        let coordinator = Arc::new(Coordinator::new(host.clone()));
        coordinator.register(CAR);
        let monitor = OffTrackMonitor::new(OffTrackConfig { enabled }, coordinator.clone());
        (host, coordinator, monitor)
    }

    #[test]
    fn test_reports_toggle_reason() {
        let (host, coordinator, monitor) = setup(true);

        assert!(monitor.on_report(&report(true)));
        assert!(!monitor.on_report(&report(true)));
        assert!(coordinator.active_reasons(CAR).contains(&Reason::OffTrack));

        assert!(monitor.on_report(&report(false)));
        assert!(!monitor.on_report(&report(false)));
        assert_eq!(host.writes_for(CAR), vec![false, true]);
    }

    #[test]
    fn test_report_does_not_release_other_reasons() {
        let (host, coordinator, monitor) = setup(true);
        coordinator.request(CAR, Reason::Penalty);

        monitor.on_report(&report(true));
        monitor.on_report(&report(false));

        assert_eq!(coordinator.collisions_enabled(CAR), Some(false));
        assert_eq!(host.writes_for(CAR), vec![false]);
    }

    #[test]
    fn test_session_change_clears_every_car() {
        let (_host, coordinator, monitor) = setup(true);
        coordinator.register(EntityId(4));
        monitor.on_report(&report(true));
        monitor.on_report(&OffTrackReport {
            entity: EntityId(4),
            ..report(true)
        });

        monitor.on_session_change();

        assert!(coordinator.active_reasons(CAR).is_empty());
        assert!(coordinator.active_reasons(EntityId(4)).is_empty());
    }

    #[test]
    fn test_disabled_monitor_ignores_reports() {
        let (host, _coordinator, monitor) = setup(false);
        assert!(!monitor.on_report(&report(true)));
        assert!(host.writes().is_empty());
    }
}
