//! Hierarchical copy specifications and their flattening into a copy plan.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::resolve::{FileResolver, PathDescriptor};
use crate::spec::{EnumCopyPatternMode, FileOpsError, Result, SpecPatterns};
use crate::tree::{FileCollection, FileDetails, FileTree};
use crate::util::{SpecCompiledPatterns, sanitize_entry_name};

////////////////////////////////////////////////////////////////////////////////
// #region ContentFilter

type FnLineFilter = dyn Fn(&str) -> String + Send + Sync;
type FnBytesFilter = dyn Fn(Vec<u8>) -> Vec<u8> + Send + Sync;
type FnRename = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Transformation applied to file content during copy.
#[derive(Clone)]
pub enum ContentFilter {
    /// Per-line text transform. Line terminators are kept as they were.
    Lines(Arc<FnLineFilter>),
    /// Whole-content byte transform.
    Bytes(Arc<FnBytesFilter>),
    /// Replace `@key@` tokens with their values.
    ReplaceTokens(BTreeMap<String, String>),
}

impl fmt::Debug for ContentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lines(_) => write!(f, "ContentFilter::Lines"),
            Self::Bytes(_) => write!(f, "ContentFilter::Bytes"),
            Self::ReplaceTokens(map) => f.debug_tuple("ContentFilter::ReplaceTokens").field(map).finish(),
        }
    }
}

impl ContentFilter {
    pub fn lines<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::Lines(Arc::new(f))
    }

    pub fn bytes<F>(f: F) -> Self
    where
        F: Fn(Vec<u8>) -> Vec<u8> + Send + Sync + 'static,
    {
        Self::Bytes(Arc::new(f))
    }

    pub fn replace_tokens<I, K, V>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::ReplaceTokens(
            tokens
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Apply to `data`; `c_name` only labels errors.
    pub(crate) fn apply(&self, data: Vec<u8>, c_name: &str) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(f) => Ok((**f)(data)),
            Self::Lines(f) => {
                let txt = into_text(data, c_name)?;
                let mut out = String::with_capacity(txt.len());
                for line in txt.split_inclusive('\n') {
                    let (body, c_terminator) = split_terminator(line);
                    out.push_str(&(**f)(body));
                    out.push_str(c_terminator);
                }
                Ok(out.into_bytes())
            }
            Self::ReplaceTokens(map) => {
                let mut txt = into_text(data, c_name)?;
                for (c_key, c_value) in map {
                    txt = txt.replace(&format!("@{c_key}@"), c_value);
                }
                Ok(txt.into_bytes())
            }
        }
    }
}

fn into_text(data: Vec<u8>, c_name: &str) -> Result<String> {
    String::from_utf8(data).map_err(|_| {
        FileOpsError::invalid_input(format!(
            "Cannot apply a text filter to '{c_name}': content is not valid UTF-8."
        ))
    })
}

fn split_terminator(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        return (body, "\r\n");
    }
    if let Some(body) = line.strip_suffix('\n') {
        return (body, "\n");
    }
    (line, "")
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CopySpec

#[derive(Clone)]
enum RenameRule {
    Regex { pattern: String, replacement: String },
    Func(Arc<FnRename>),
}

impl fmt::Debug for RenameRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regex {
                pattern,
                replacement,
            } => write!(f, "rename({pattern:?} -> {replacement:?})"),
            Self::Func(_) => write!(f, "rename(<fn>)"),
        }
    }
}

enum CompiledRename {
    Regex { regex: Regex, replacement: String },
    Func(Arc<FnRename>),
}

impl CompiledRename {
    fn compile(rule: &RenameRule) -> Result<Self> {
        match rule {
            RenameRule::Regex {
                pattern,
                replacement,
            } => {
                let regex = Regex::new(pattern).map_err(|e| {
                    FileOpsError::InvalidPattern(format!("Invalid rename pattern '{pattern}': {e}"))
                })?;
                Ok(Self::Regex {
                    regex,
                    replacement: replacement.clone(),
                })
            }
            RenameRule::Func(f) => Ok(Self::Func(Arc::clone(f))),
        }
    }

    /// `None` when the rule does not apply to `c_name`.
    fn apply(&self, c_name: &str) -> Option<String> {
        match self {
            Self::Regex { regex, replacement } => regex
                .is_match(c_name)
                .then(|| regex.replace_all(c_name, replacement.as_str()).into_owned()),
            Self::Func(f) => (**f)(c_name),
        }
    }
}

#[derive(Debug, Clone)]
enum CopySource {
    Tree(FileTree),
    Path(PathDescriptor),
}

/// One node of a copy specification tree.
///
/// A node without sources copies from its nearest ancestor's sources. Patterns,
/// rename rules and filters accumulate from the root down to each node.
#[derive(Debug, Clone, Default)]
pub struct CopySpec {
    l_sources: Vec<CopySource>,
    c_prefix: String,
    l_includes: Vec<String>,
    l_excludes: Vec<String>,
    rule_pattern: EnumCopyPatternMode,
    l_renames: Vec<RenameRule>,
    l_filters: Vec<ContentFilter>,
    l_children: Vec<CopySpec>,
}

/// One resolved entry of a copy plan.
#[derive(Debug, Clone)]
pub struct PlannedCopy {
    pub details: FileDetails,
    pub l_filters: Vec<ContentFilter>,
}

impl PlannedCopy {
    /// Source bytes with every effective filter applied in order.
    pub fn content(&self) -> Result<Vec<u8>> {
        let mut data = self.details.read_bytes()?;
        for filter in &self.l_filters {
            data = filter.apply(data, self.details.relative_path())?;
        }
        Ok(data)
    }

    pub fn is_filtered(&self) -> bool {
        !self.l_filters.is_empty()
    }
}

impl CopySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tree(mut self, tree: FileTree) -> Self {
        self.l_sources.push(CopySource::Tree(tree));
        self
    }

    /// Directory or file source, resolved when the plan is built.
    pub fn from_path<D: Into<PathDescriptor>>(mut self, descriptor: D) -> Self {
        self.l_sources.push(CopySource::Path(descriptor.into()));
        self
    }

    /// Destination sub-path for this node and its children.
    pub fn into_dir<S: Into<String>>(mut self, prefix: S) -> Self {
        self.c_prefix = prefix.into();
        self
    }

    pub fn include<S: Into<String>>(mut self, pattern: S) -> Self {
        self.l_includes.push(pattern.into());
        self
    }

    pub fn exclude<S: Into<String>>(mut self, pattern: S) -> Self {
        self.l_excludes.push(pattern.into());
        self
    }

    /// Mode for this node's own include/exclude patterns.
    pub fn pattern_mode(mut self, rule_pattern: EnumCopyPatternMode) -> Self {
        self.rule_pattern = rule_pattern;
        self
    }

    /// Rewrite matching file names with a regex replacement.
    ///
    /// Every match in the name is replaced, so anchor the pattern to touch one
    /// spot. Groups are referenced as `${1}` or `${name}`; a bare `$1_x` reads as
    /// the group named `1_x`.
    pub fn rename<S: Into<String>, R: Into<String>>(mut self, pattern: S, replacement: R) -> Self {
        self.l_renames.push(RenameRule::Regex {
            pattern: pattern.into(),
            replacement: replacement.into(),
        });
        self
    }

    /// Rewrite file names with a function; `None` leaves the name to later rules.
    pub fn rename_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.l_renames.push(RenameRule::Func(Arc::new(f)));
        self
    }

    pub fn filter(mut self, filter: ContentFilter) -> Self {
        self.l_filters.push(filter);
        self
    }

    pub fn with_child(mut self, child: CopySpec) -> Self {
        self.l_children.push(child);
        self
    }

    pub fn children(&self) -> &[CopySpec] {
        &self.l_children
    }

    /// Diagnostics of explicit tree sources anywhere in this spec.
    pub(crate) fn source_diagnostics(&self) -> Vec<String> {
        let mut l_diagnostics: Vec<String> = self
            .l_sources
            .iter()
            .filter_map(|source| match source {
                CopySource::Tree(tree) => Some(tree.diagnostics()),
                CopySource::Path(_) => None,
            })
            .flatten()
            .collect();
        for child in &self.l_children {
            l_diagnostics.extend(child.source_diagnostics());
        }
        l_diagnostics
    }

    /// Flatten the tree into destination-relative path -> entry.
    ///
    /// Nodes are folded in pre-order and declaration order; a later node wins
    /// over an earlier one that targets the same destination path.
    pub fn plan(&self, resolver: &FileResolver) -> Result<BTreeMap<String, PlannedCopy>> {
        let mut map_plan = BTreeMap::new();
        let ctx_root = PlanContext {
            l_sources: &[],
            c_prefix: String::new(),
            spec_pats: SpecCompiledPatterns::default(),
            l_renames: Vec::new(),
            l_filters: Vec::new(),
        };
        self.plan_node(&ctx_root, resolver, &mut map_plan)?;
        Ok(map_plan)
    }

    fn plan_node<'a>(
        &'a self,
        ctx_parent: &PlanContext<'a>,
        resolver: &FileResolver,
        map_plan: &mut BTreeMap<String, PlannedCopy>,
    ) -> Result<()> {
        let ctx = self.derive_context(ctx_parent)?;

        for source in ctx.l_sources {
            let tree = match source {
                CopySource::Tree(tree) => tree.clone(),
                CopySource::Path(descriptor) => {
                    FileCollection::new(resolver.clone(), [descriptor.clone()]).as_file_tree()
                }
            };
            tree.visit(|details| {
                if details.is_directory()
                    || !ctx.spec_pats.is_included(details.relative_path(), false)
                {
                    return Ok(());
                }
                let c_dst = ctx.destination_for(details.relative_path())?;
                let planned = PlannedCopy {
                    details,
                    l_filters: ctx.l_filters.clone(),
                };
                if let Some(previous) = map_plan.insert(c_dst.clone(), planned) {
                    debug!(
                        destination = %c_dst,
                        source_overridden = %previous.details.display_name(),
                        "later copy spec overrides earlier entry"
                    );
                }
                Ok(())
            })?;
        }

        for child in &self.l_children {
            child.plan_node(&ctx, resolver, map_plan)?;
        }
        Ok(())
    }

    fn derive_context<'a>(&'a self, ctx_parent: &PlanContext<'a>) -> Result<PlanContext<'a>> {
        let l_sources: &'a [CopySource] = if self.l_sources.is_empty() {
            ctx_parent.l_sources
        } else {
            &self.l_sources
        };

        let c_prefix = if self.c_prefix.is_empty() {
            ctx_parent.c_prefix.clone()
        } else {
            let c_own = sanitize_entry_name(&self.c_prefix).ok_or_else(|| {
                FileOpsError::invalid_input(format!(
                    "Copy destination prefix '{}' must be relative and stay inside the destination.",
                    self.c_prefix
                ))
            })?;
            join_segments(&ctx_parent.c_prefix, &c_own)
        };

        let mut spec_pats = ctx_parent.spec_pats.clone();
        spec_pats.extend(&SpecCompiledPatterns::from_spec(&SpecPatterns {
            patterns_include: self.l_includes.clone(),
            patterns_exclude: self.l_excludes.clone(),
            rule_pattern: self.rule_pattern,
        })?);

        let mut l_renames = ctx_parent.l_renames.clone();
        for rule in &self.l_renames {
            l_renames.push(Arc::new(CompiledRename::compile(rule)?));
        }

        let mut l_filters = ctx_parent.l_filters.clone();
        l_filters.extend(self.l_filters.iter().cloned());

        Ok(PlanContext {
            l_sources,
            c_prefix,
            spec_pats,
            l_renames,
            l_filters,
        })
    }
}

struct PlanContext<'a> {
    l_sources: &'a [CopySource],
    c_prefix: String,
    spec_pats: SpecCompiledPatterns,
    l_renames: Vec<Arc<CompiledRename>>,
    l_filters: Vec<ContentFilter>,
}

impl PlanContext<'_> {
    /// Destination-relative path for a source-relative path.
    fn destination_for(&self, c_relative: &str) -> Result<String> {
        let (c_dir, c_name) = match c_relative.rsplit_once('/') {
            Some((c_dir, c_name)) => (c_dir, c_name),
            None => ("", c_relative),
        };
        let c_name_new = self
            .l_renames
            .iter()
            .find_map(|rule| rule.apply(c_name))
            .unwrap_or_else(|| c_name.to_string());

        let c_joined = join_segments(&join_segments(&self.c_prefix, c_dir), &c_name_new);
        match sanitize_entry_name(&c_joined) {
            Some(c_dst) if !c_dst.is_empty() && !c_name_new.is_empty() => Ok(c_dst),
            _ => Err(FileOpsError::invalid_input(format!(
                "Renaming '{c_relative}' to '{c_name_new}' leaves the copy destination."
            ))),
        }
    }
}

fn join_segments(c_left: &str, c_right: &str) -> String {
    match (c_left.is_empty(), c_right.is_empty()) {
        (true, _) => c_right.to_string(),
        (false, true) => c_left.to_string(),
        (false, false) => format!("{c_left}/{c_right}"),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
