//! Metric instruments and recording helpers
//!
//! Instruments are created lazily from the global meter, so they bind to
//! whatever provider [`crate::init`] installed (or a no-op provider in tests).

use std::sync::OnceLock;
use std::time::Instant;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};

pub const COMMAND_COUNT: &str = "muse.command.count";
pub const COMMAND_ERRORS: &str = "muse.command.errors";
pub const GENERATION_DURATION: &str = "muse.generation.duration";
pub const PROVIDER_OUTCOME: &str = "muse.provider.outcome";
pub const PROVIDER_DURATION: &str = "muse.provider.duration";
pub const DISPATCH_IN_FLIGHT: &str = "muse.dispatch.in_flight";

struct Instruments {
    command_count: Counter<u64>,
    command_errors: Counter<u64>,
    generation_duration: Histogram<f64>,
    provider_outcome: Counter<u64>,
    provider_duration: Histogram<f64>,
    in_flight: UpDownCounter<i64>,
}

fn instruments() -> &'static Instruments {
    static INSTRUMENTS: OnceLock<Instruments> = OnceLock::new();

    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("muse");

        Instruments {
            command_count: meter
                .u64_counter(COMMAND_COUNT)
                .with_description("Bot commands received, by command name")
                .build(),
            command_errors: meter
                .u64_counter(COMMAND_ERRORS)
                .with_description("Failed bot commands, by failure kind")
                .build(),
            generation_duration: meter
                .f64_histogram(GENERATION_DURATION)
                .with_unit("s")
                .with_description("End-to-end image generation latency")
                .build(),
            provider_outcome: meter
                .u64_counter(PROVIDER_OUTCOME)
                .with_description("Provider attempts, by provider and outcome")
                .build(),
            provider_duration: meter
                .f64_histogram(PROVIDER_DURATION)
                .with_unit("s")
                .with_description("Latency of a single provider attempt")
                .build(),
            in_flight: meter
                .i64_up_down_counter(DISPATCH_IN_FLIGHT)
                .with_description("Commands admitted but not yet finished")
                .build(),
        }
    })
}

/// Count a received command
pub fn record_command(command: &str) {
    instruments()
        .command_count
        .add(1, &[KeyValue::new("command", command.to_owned())]);
}

/// Count a failed command, e.g. `generation`, `reply`, `panic`, `timeout`
pub fn record_command_error(kind: &'static str) {
    instruments().command_errors.add(1, &[KeyValue::new("kind", kind)]);
}

/// Record the end-to-end latency of a generation request
pub fn record_generation(start: Instant, success: bool) {
    instruments()
        .generation_duration
        .record(start.elapsed().as_secs_f64(), &[KeyValue::new("success", success)]);
}

/// Record the outcome of a single provider attempt
pub fn record_provider_outcome(provider: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    instruments().provider_outcome.add(
        1,
        &[
            KeyValue::new("provider", provider.to_owned()),
            KeyValue::new("outcome", outcome),
        ],
    );
}

/// Record how long a provider call took
pub fn record_provider_duration(provider: &str, start: Instant) {
    instruments().provider_duration.record(
        start.elapsed().as_secs_f64(),
        &[KeyValue::new("provider", provider.to_owned())],
    );
}

/// Adjust the in-flight command gauge
pub fn add_in_flight(delta: i64) {
    instruments().in_flight.add(delta, &[]);
}
