//! Observability for the RTC controller.
//!
//! Metric labels are bounded:
//! - `actor_type`: 2 values (controller, session)
//! - `command`: bounded by the session command set
//! - `event`: bounded by `RtcEvent` variants
//! - `kind`: bounded by `StateConflict` variants
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rtc_sessions_active` | Gauge | none | Live sessions owned by the factory |
//! | `rtc_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `rtc_commands_total` | Counter | `command`, `outcome` | Command throughput and local rejections |
//! | `rtc_state_conflicts_total` | Counter | `kind` | Commands refused by session state |
//! | `rtc_events_dispatched_total` | Counter | `event` | Observer fan-out volume |
//! | `rtc_room_enter_duration_seconds` | Histogram | `status` | Time from enter request to engine acknowledgment |
//! | `rtc_publish_task_transitions_total` | Counter | `state` | Publish task lifecycle |
//! | `rtc_actor_panics_total` | Counter | `actor_type` | Supervisor-detected panics |

pub mod metrics;

pub use metrics::{
    init_metrics_recorder, record_actor_panic, record_command, record_event_dispatched,
    record_publish_task_transition, record_room_enter, record_state_conflict,
    set_actor_mailbox_depth, set_sessions_active,
};
