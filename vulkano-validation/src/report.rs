//! Structured diagnostics.
//!
//! The layer never formats messages for humans beyond a single line; everything it finds is
//! handed to a [`Reporter`] as a [`Diagnostic`]. The value the reporter returns tells the layer
//! whether the offending call should be skipped.

use crate::{handle::TypedHandle, ErrorKind, ObjectType, ValidationError};
use foldhash::HashMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::{
    fmt::{Display, Error as FmtError, Formatter, Write},
    sync::Arc,
};

/// How serious a diagnostic is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Info,
    PerformanceWarning,
    Warning,
    #[default]
    Error,
}

/// A single finding of the layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: ErrorKind,

    /// The kind of the primary object.
    pub object_type: ObjectType,

    /// The raw handle of the primary object, or 0 if there is none.
    pub object_handle: u64,

    /// Every object involved, the primary object first.
    pub objects: SmallVec<[TypedHandle; 2]>,

    /// The stable identifier of the check that failed.
    pub vuid: &'static str,

    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "[ {} ] {}", self.vuid, self.message)
    }
}

/// Receives diagnostics from the layer.
pub trait Reporter: Send + Sync {
    /// Handles one diagnostic. Returns `true` if the call that caused it should be skipped.
    fn report(&self, diagnostic: &Diagnostic) -> bool;
}

/// A reporter that forwards diagnostics to the [`log`] crate and never skips.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, diagnostic: &Diagnostic) -> bool {
        let level = match diagnostic.severity {
            Severity::Error => log::Level::Error,
            Severity::Warning | Severity::PerformanceWarning => log::Level::Warn,
            Severity::Info => log::Level::Info,
        };
        log::log!(target: "vulkano_validation", level, "{}", diagnostic);

        false
    }
}

/// A reporter that keeps every diagnostic in the order it was emitted.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    diagnostics: Mutex<Vec<Diagnostic>>,
    skip_on_error: bool,
}

impl CollectingReporter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a reporter that asks for the call to be skipped whenever it receives an error.
    #[inline]
    pub fn skipping() -> Self {
        Self {
            diagnostics: Mutex::default(),
            skip_on_error: true,
        }
    }

    /// Returns a copy of all diagnostics received so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }

    /// Removes and returns all diagnostics received so far.
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.lock())
    }

    /// Returns whether a diagnostic with the given identifier was received.
    pub fn contains(&self, vuid: &str) -> bool {
        self.diagnostics.lock().iter().any(|d| d.vuid == vuid)
    }

    /// Returns the number of diagnostics with at least `Warning` severity.
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .lock()
            .iter()
            .filter(|d| d.severity >= Severity::Warning)
            .count()
    }

    pub fn clear(&self) {
        self.diagnostics.lock().clear();
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, diagnostic: &Diagnostic) -> bool {
        self.diagnostics.lock().push(diagnostic.clone());

        self.skip_on_error && diagnostic.severity == Severity::Error
    }
}

/// The layer's side of the reporter: object names, message limits, and conversion from
/// `ValidationError`.
pub(crate) struct DebugReport {
    sink: Arc<dyn Reporter>,
    object_names: RwLock<HashMap<TypedHandle, String>>,
    duplicate_limit: Option<u32>,
    emitted: Mutex<HashMap<&'static str, u32>>,
}

impl DebugReport {
    pub(crate) fn new(sink: Arc<dyn Reporter>, duplicate_limit: Option<u32>) -> Self {
        DebugReport {
            sink,
            object_names: RwLock::default(),
            duplicate_limit,
            emitted: Mutex::default(),
        }
    }

    pub(crate) fn set_object_name(&self, object: TypedHandle, name: Option<String>) {
        let mut names = self.object_names.write();

        match name {
            Some(name) if !name.is_empty() => {
                names.insert(object, name);
            }
            _ => {
                names.remove(&object);
            }
        }
    }

    pub(crate) fn forget_object(&self, object: TypedHandle) {
        if self.object_names.read().contains_key(&object) {
            self.object_names.write().remove(&object);
        }
    }

    /// Formats a handle as `VkImage 0x1f[name]`.
    pub(crate) fn format_handle(&self, object: TypedHandle) -> String {
        let mut out = object.to_string();

        if let Some(name) = self.object_names.read().get(&object) {
            let _ = write!(out, "[{}]", name);
        }

        out
    }

    /// Emits `error` and returns whether the call should be skipped.
    pub(crate) fn emit(&self, error: Box<ValidationError>) -> bool {
        let vuid = error.vuid();

        if let Some(limit) = self.duplicate_limit {
            let mut emitted = self.emitted.lock();
            let count = emitted.entry(vuid).or_insert(0);

            if *count >= limit {
                return false;
            }

            *count += 1;
        }

        let mut message = String::new();

        for (index, object) in error.objects.iter().enumerate() {
            if index != 0 {
                message.push_str(", ");
            }

            message.push_str(&self.format_handle(*object));
        }

        if !message.is_empty() {
            message.push_str(": ");
        }

        if error.context.is_empty() {
            message.push_str(&error.problem);
        } else {
            let _ = write!(message, "{}: {}", error.context, error.problem);
        }

        let (object_type, object_handle) = error
            .objects
            .first()
            .map_or((ObjectType::Unknown, 0), |o| (o.object_type, o.handle));

        let diagnostic = Diagnostic {
            severity: error.severity,
            kind: error.kind,
            object_type,
            object_handle,
            objects: error.objects,
            vuid,
            message,
        };

        self.sink.report(&diagnostic)
    }
}
