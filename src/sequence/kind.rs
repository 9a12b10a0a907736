//! Sequence kinds and the per-run kind registry.

use rustc_hash::FxHashMap;

use super::{DType, Sequence, TraceArea};
use crate::context::Context;
use crate::{Error, Result};

/// Closed set of sequence kinds.
///
/// Each kind declares the primitive dtypes it accepts; a sequence whose
/// stored dtype is outside that set is invisible to the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    /// Numeric metrics (`int`, `float`).
    Metric,
    /// Image sequences.
    Images,
    /// Audio sequences.
    Audios,
    /// Text sequences.
    Texts,
    /// Distribution sequences.
    Distributions,
    /// Figure sequences.
    Figures,
}

impl SequenceKind {
    /// All built-in kinds.
    pub const ALL: [Self; 6] = [
        Self::Metric,
        Self::Images,
        Self::Audios,
        Self::Texts,
        Self::Distributions,
        Self::Figures,
    ];

    /// Registry name of the kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Images => "images",
            Self::Audios => "audios",
            Self::Texts => "texts",
            Self::Distributions => "distributions",
            Self::Figures => "figures",
        }
    }

    /// Dtypes this kind accepts.
    #[must_use]
    pub const fn allowed_dtypes(self) -> &'static [DType] {
        match self {
            Self::Metric => &[DType::Float, DType::Int],
            Self::Images => &[DType::Image],
            Self::Audios => &[DType::Audio],
            Self::Texts => &[DType::Text],
            Self::Distributions => &[DType::Distribution],
            Self::Figures => &[DType::Figure],
        }
    }

    /// Whether a stored dtype name belongs to this kind.
    #[must_use]
    pub fn accepts(self, dtype: &str) -> bool {
        DType::parse(dtype).is_some_and(|dtype| self.allowed_dtypes().contains(&dtype))
    }

    /// Typed view over the sequence `(name, context)` stored in `area`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub(crate) fn wrap(
        self,
        name: &str,
        context: Context,
        context_idx: u64,
        area: &TraceArea,
    ) -> Result<Sequence> {
        let info = area.info(context_idx, name)?.unwrap_or_default();
        Ok(Sequence::new(self, name, context, context_idx, info, area))
    }
}

/// Named catalog of sequence kinds, owned by one run.
///
/// Keeping the registry as a constructed object (instead of a process-wide
/// table) means runs and tests never share mutable registry state.
#[derive(Debug, Clone)]
pub struct SequenceRegistry {
    kinds: FxHashMap<String, SequenceKind>,
}

impl SequenceRegistry {
    /// Registry holding only the built-in kinds.
    #[must_use]
    pub fn with_builtin_kinds() -> Self {
        let mut registry = Self {
            kinds: FxHashMap::default(),
        };
        for kind in SequenceKind::ALL {
            registry.register(kind.name(), kind);
        }
        registry
    }

    /// Register `kind` under an additional name (e.g. an alias).
    pub fn register(&mut self, name: impl Into<String>, kind: SequenceKind) {
        self.kinds.insert(name.into(), kind);
    }

    /// Kind registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSequenceKind` if `name` is not registered.
    pub fn get(&self, name: &str) -> Result<SequenceKind> {
        self.kinds
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownSequenceKind(name.to_string()))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Reverse map `dtype → kind names` for the requested kinds.
    ///
    /// Built once per summary so classifying a sequence is a single lookup
    /// instead of a scan over every kind.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSequenceKind` for unregistered names.
    pub fn dtype_to_kinds<S: AsRef<str>>(
        &self,
        kind_names: &[S],
    ) -> Result<FxHashMap<DType, Vec<String>>> {
        let mut reverse: FxHashMap<DType, Vec<String>> = FxHashMap::default();
        for name in kind_names {
            let name = name.as_ref();
            for dtype in self.get(name)?.allowed_dtypes() {
                reverse.entry(*dtype).or_default().push(name.to_string());
            }
        }
        Ok(reverse)
    }
}

impl Default for SequenceRegistry {
    fn default() -> Self {
        Self::with_builtin_kinds()
    }
}
