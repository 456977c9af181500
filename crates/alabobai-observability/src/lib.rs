use serde::Serialize;
use tracing::Level;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Runner,
    Watchdog,
    Reliability,
    JobQueue,
    Server,
}

impl Component {
    pub fn as_str(self) -> &'static str {
        match self {
            Component::Runner => "runner",
            Component::Watchdog => "watchdog",
            Component::Reliability => "reliability",
            Component::JobQueue => "job_queue",
            Component::Server => "server",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub run_id: Option<&'a str>,
    pub job_id: Option<&'a str>,
    pub capability_id: Option<&'a str>,
    pub state: Option<&'a str>,
    pub attempt: Option<u32>,
    pub detail: Option<&'a str>,
}

impl<'a> ObservabilityEvent<'a> {
    pub fn new(event: &'a str) -> Self {
        Self {
            event,
            run_id: None,
            job_id: None,
            capability_id: None,
            state: None,
            attempt: None,
            detail: None,
        }
    }
}

pub fn emit_event(level: Level, component: Component, event: ObservabilityEvent<'_>) {
    match level {
        Level::ERROR => tracing::error!(
            target: "alabobai.obs",
            component = component.as_str(),
            event = event.event,
            run_id = event.run_id.unwrap_or(""),
            job_id = event.job_id.unwrap_or(""),
            capability_id = event.capability_id.unwrap_or(""),
            state = event.state.unwrap_or(""),
            attempt = event.attempt.unwrap_or(0),
            detail = event.detail.unwrap_or(""),
            "observability_event"
        ),
        Level::WARN => tracing::warn!(
            target: "alabobai.obs",
            component = component.as_str(),
            event = event.event,
            run_id = event.run_id.unwrap_or(""),
            job_id = event.job_id.unwrap_or(""),
            capability_id = event.capability_id.unwrap_or(""),
            state = event.state.unwrap_or(""),
            attempt = event.attempt.unwrap_or(0),
            detail = event.detail.unwrap_or(""),
            "observability_event"
        ),
        _ => tracing::info!(
            target: "alabobai.obs",
            component = component.as_str(),
            event = event.event,
            run_id = event.run_id.unwrap_or(""),
            job_id = event.job_id.unwrap_or(""),
            capability_id = event.capability_id.unwrap_or(""),
            state = event.state.unwrap_or(""),
            attempt = event.attempt.unwrap_or(0),
            detail = event.detail.unwrap_or(""),
            "observability_event"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_optional_fields() {
        let mut event = ObservabilityEvent::new("run.step.succeeded");
        event.run_id = Some("r-1");
        event.attempt = Some(2);
        emit_event(Level::INFO, Component::Runner, event);
    }
}
