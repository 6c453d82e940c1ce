/// Sink for human readable compile and runtime errors.
pub trait Diagnostics {
    fn report(&mut self, message: &str, line: Option<u32>);
}

impl<T: Diagnostics + ?Sized> Diagnostics for &mut T {
    fn report(&mut self, message: &str, line: Option<u32>) {
        (**self).report(message, line)
    }
}

/// Forwards every report to `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&mut self, message: &str, line: Option<u32>) {
        match line {
            Some(line) => tracing::error!(line, "{message}"),
            None => tracing::error!("{message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub line: Option<u32>,
}

/// Keeps every report in memory.
#[derive(Debug, Default, Clone)]
pub struct CollectedDiagnostics {
    pub reports: Vec<Diagnostic>,
}

impl CollectedDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

impl Diagnostics for CollectedDiagnostics {
    fn report(&mut self, message: &str, line: Option<u32>) {
        self.reports.push(Diagnostic {
            message: message.into(),
            line,
        });
    }
}
