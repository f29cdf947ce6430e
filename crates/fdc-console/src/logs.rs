/// Per-entity log stream subscription.
///
/// The machine only moves forward: `Unsubscribed -> Subscribing -> Streaming`.
/// Acquisition is expensive on the controller side, so once streaming the
/// panel flag toggles display and nothing is ever re-requested. The only way
/// back is the failure path of an acquisition reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogSubscription {
    #[default]
    Unsubscribed,
    /// Acquisition request in flight; repeated requests are ignored.
    Subscribing,
    Streaming {
        lines: Vec<String>,
        panel_open: bool,
    },
}

/// What a user-initiated log request should do, decided by current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    /// Issue the one acquisition request.
    Acquire,
    /// A request is already in flight; do nothing.
    AlreadyPending,
    /// Streaming already; the panel flag was toggled.
    TogglePanel,
}

impl LogSubscription {
    pub fn request(&mut self) -> LogAction {
        match self {
            LogSubscription::Unsubscribed => LogAction::Acquire,
            LogSubscription::Subscribing => LogAction::AlreadyPending,
            LogSubscription::Streaming { panel_open, .. } => {
                *panel_open = !*panel_open;
                LogAction::TogglePanel
            }
        }
    }

    /// Transition to `Subscribing` once the acquisition request is actually
    /// on the wire.
    pub fn begin_acquisition(&mut self) {
        if matches!(self, LogSubscription::Unsubscribed) {
            *self = LogSubscription::Subscribing;
        }
    }

    /// Acquisition reply arrived: seed the buffer and open the panel.
    pub fn seed(&mut self, stream: &str) {
        let lines = stream
            .lines()
            .map(str::to_string)
            .collect::<Vec<String>>();
        *self = LogSubscription::Streaming {
            lines,
            panel_open: true,
        };
    }

    /// Acquisition failed or the link dropped mid-request; allow a retry.
    pub fn fail_acquisition(&mut self) {
        if matches!(self, LogSubscription::Subscribing) {
            *self = LogSubscription::Unsubscribed;
        }
    }

    /// Appends one line; returns false (and drops the line) unless streaming.
    pub fn append(&mut self, line: &str) -> bool {
        match self {
            LogSubscription::Streaming { lines, .. } => {
                lines.push(line.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, LogSubscription::Streaming { .. })
    }

    pub fn panel_open(&self) -> bool {
        matches!(
            self,
            LogSubscription::Streaming {
                panel_open: true,
                ..
            }
        )
    }

    pub fn lines(&self) -> &[String] {
        match self {
            LogSubscription::Streaming { lines, .. } => lines,
            _ => &[],
        }
    }
}
