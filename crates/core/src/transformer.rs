//! Source-to-source transformers applied before a script is prepared.
//!
//! A [`Transformer`] claims one source language and rewrites matching
//! scripts into a target language. [`TranspilingTransformer`] builds its
//! rewriting engine lazily: the first caller triggers the build, concurrent
//! callers wait for that same build, and the engine is reused afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::error::CoreError;
use crate::script::Script;

#[async_trait]
pub trait Transformer: Send + Sync {
    fn source_language(&self) -> &str;

    fn target_language(&self) -> &str;

    /// Rewrite `script` if it is written in the source language; return it
    /// unchanged otherwise.
    async fn transform(&self, script: Script) -> Result<Script, CoreError>;

    /// Start any expensive initialization in the background.
    fn warm_up(self: Arc<Self>) -> Option<JoinHandle<()>> {
        None
    }
}

/// A ready rewriting engine.
pub trait Rewriter: Send + Sync {
    fn rewrite(&self, source: &str) -> Result<String, CoreError>;
}

/// Builds a [`Rewriter`]; may be slow.
#[async_trait]
pub trait RewriterFactory: Send + Sync {
    async fn build(&self) -> Result<Arc<dyn Rewriter>, CoreError>;
}

pub struct TranspilingTransformer {
    source: String,
    target: String,
    factory: Box<dyn RewriterFactory>,
    engine: OnceCell<Arc<dyn Rewriter>>,
}

impl TranspilingTransformer {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        factory: impl RewriterFactory + 'static,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            factory: Box::new(factory),
            engine: OnceCell::new(),
        }
    }

    /// The engine, built on first use. A failed build is not cached; the
    /// next caller retries.
    pub async fn engine(&self) -> Result<Arc<dyn Rewriter>, CoreError> {
        self.engine
            .get_or_try_init(|| async {
                tracing::info!(
                    source = %self.source,
                    target = %self.target,
                    "Building transformer engine"
                );
                self.factory.build().await
            })
            .await
            .map(Arc::clone)
    }

    pub fn is_ready(&self) -> bool {
        self.engine.initialized()
    }
}

#[async_trait]
impl Transformer for TranspilingTransformer {
    fn source_language(&self) -> &str {
        &self.source
    }

    fn target_language(&self) -> &str {
        &self.target
    }

    async fn transform(&self, script: Script) -> Result<Script, CoreError> {
        if !script.language().eq_ignore_ascii_case(&self.source) {
            return Ok(script);
        }
        let engine = self.engine().await?;
        let body = engine.rewrite(script.body())?;
        tracing::debug!(script_id = script.id(), target = %self.target, "Transformed script");
        script.with_source(self.target.clone(), body)
    }

    fn warm_up(self: Arc<Self>) -> Option<JoinHandle<()>> {
        Some(tokio::spawn(async move {
            if let Err(e) = self.engine().await {
                tracing::warn!(source = %self.source, error = %e, "Transformer warm-up failed");
            }
        }))
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Transformers keyed by (lower-cased) source language.
#[derive(Clone, Default)]
pub struct TransformerPipeline {
    transformers: BTreeMap<String, Arc<dyn Transformer>>,
}

impl TransformerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `transformer`; one transformer per source language.
    pub fn register(&mut self, transformer: Arc<dyn Transformer>) -> Result<(), CoreError> {
        let language = transformer.source_language().to_ascii_lowercase();
        if self.transformers.contains_key(&language) {
            return Err(CoreError::Conflict(format!(
                "Duplicate transformer for language: {language}"
            )));
        }
        self.transformers.insert(language, transformer);
        Ok(())
    }

    /// Apply the transformer registered for the script's language, if any.
    pub async fn apply(&self, script: Script) -> Result<Script, CoreError> {
        match self
            .transformers
            .get(&script.language().to_ascii_lowercase())
        {
            Some(transformer) => transformer.transform(script).await,
            None => Ok(script),
        }
    }

    /// Kick off background initialization of every transformer.
    pub fn warm_up(&self) -> Vec<JoinHandle<()>> {
        self.transformers
            .values()
            .filter_map(|transformer| Arc::clone(transformer).warm_up())
            .collect()
    }

    pub fn source_languages(&self) -> Vec<&str> {
        self.transformers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for TransformerPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerPipeline")
            .field("source_languages", &self.source_languages())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pipe syntax
// ---------------------------------------------------------------------------

/// `pipe` scripts are `expr` written left to right:
/// `text |> trim |> replace("a", "b")` becomes `replace(trim(text), "a", "b")`.
pub fn pipe_transformer() -> TranspilingTransformer {
    TranspilingTransformer::new("pipe", "expr", PipeRewriterFactory)
}

pub struct PipeRewriterFactory;

#[async_trait]
impl RewriterFactory for PipeRewriterFactory {
    async fn build(&self) -> Result<Arc<dyn Rewriter>, CoreError> {
        Ok(Arc::new(PipeRewriter::new()?))
    }
}

pub struct PipeRewriter {
    /// A stage that is a (possibly dotted) name with optional arguments.
    stage: Regex,
}

impl PipeRewriter {
    pub fn new() -> Result<Self, CoreError> {
        let stage = Regex::new(r"(?s)^\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*(?:\((.*)\))?\s*$")
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(Self { stage })
    }

    fn apply_stage(&self, acc: &str, stage: &str) -> String {
        match self.stage.captures(stage) {
            Some(captures) => {
                let name = &captures[1];
                match captures.get(2).map(|args| args.as_str().trim()) {
                    Some(args) if !args.is_empty() => format!("{name}({acc}, {args})"),
                    _ => format!("{name}({acc})"),
                }
            }
            // Anything else (e.g. a lambda) is called as a value.
            None => format!("({})({acc})", stage.trim()),
        }
    }
}

impl Rewriter for PipeRewriter {
    fn rewrite(&self, source: &str) -> Result<String, CoreError> {
        let stages = split_pipes(source)?;
        let mut stages = stages.into_iter();
        let first = stages
            .next()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::Validation("Empty pipe expression".to_string()))?;

        stages.try_fold(first, |acc, stage| {
            if stage.trim().is_empty() {
                Err(CoreError::Validation("Empty pipe stage".to_string()))
            } else {
                Ok(self.apply_stage(&acc, stage))
            }
        })
    }
}

/// Split at `|>` occurrences outside string literals and brackets.
fn split_pipes(source: &str) -> Result<Vec<&str>, CoreError> {
    let mut stages = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    let mut chars = source.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                c if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    CoreError::Validation(format!("Unbalanced '{c}' at offset {i}"))
                })?;
            }
            '|' if depth == 0 && matches!(chars.peek(), Some(&(_, '>'))) => {
                stages.push(&source[start..i]);
                chars.next();
                start = i + 2;
            }
            _ => {}
        }
    }

    if quote.is_some() || depth != 0 {
        return Err(CoreError::Validation(
            "Unterminated string or bracket in pipe expression".to_string(),
        ));
    }
    stages.push(&source[start..]);
    Ok(stages)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
