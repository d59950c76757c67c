//! Processing of jars and the jars nested inside them.
//!
//! A [`JarProcessor`] runs an ordered list of [`ProcessStep`]s over every
//! jar it is given. For each jar the steps get a chance to pre-process it,
//! to ask for nested entries to be extracted and processed recursively, and
//! to post-process the rewritten jar. Results land in the working directory
//! with the modification time of their input.
//!
//! Rewriting a jar replaces the bytes of every processed nested entry, so
//! an outer signature covering those entries no longer verifies afterwards.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::*;
use crate::verifier::{JarVerifier, VerificationResult};

/// Deepest nesting level processed; deeper jars are rejected.
pub const MAX_NESTING_DEPTH: usize = 8;

/// Where a jar is being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessContext {
    /// 0 for a top-level jar, +1 per level of nesting.
    pub depth: usize,
    /// Directory that receives the processed jar.
    pub working_dir: PathBuf,
    /// Human-readable origin, e.g. `outer.jar!/lib/inner.jar`.
    pub origin: String,
}

impl ProcessContext {
    fn nested(&self, working_dir: PathBuf, entry_name: &str) -> Self {
        ProcessContext {
            depth: self.depth + 1,
            working_dir,
            origin: format!("{}!/{}", self.origin, entry_name),
        }
    }
}

/// One step of the pipeline. Every method defaults to doing nothing.
pub trait ProcessStep {
    /// Called before the jar is opened. Returning a path substitutes the
    /// file the remaining steps work on.
    fn pre_process(
        &mut self,
        _input: &Path,
        _context: &ProcessContext,
    ) -> Result<Option<PathBuf>, JarError> {
        Ok(None)
    }

    /// Name the processed result of a nested entry should be stored under,
    /// or `None` to leave the entry alone.
    fn recursion_effect(&self, _entry_name: &str) -> Option<String> {
        None
    }

    /// Called on the rewritten jar. Returning a path substitutes the result.
    fn post_process(
        &mut self,
        _input: &Path,
        _context: &ProcessContext,
    ) -> Result<Option<PathBuf>, JarError> {
        Ok(None)
    }
}

/// Outcome of [`JarProcessor::process`].
#[derive(Debug, Default)]
pub struct ProcessReport {
    pub outputs: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, JarError)>,
}

/// Accepts files with a `.jar` extension, in any case.
pub fn jar_filter(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("jar"))
        .unwrap_or(false)
}

/// Relative path for an archive entry name, or `None` if the name would
/// leave the directory it is extracted into.
fn enclosed_path(name: &str) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

fn file_name(path: &Path) -> Result<String, JarError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| JarError::InternalError(format!("no file name in {}", path.display())))
}

pub struct JarProcessor {
    steps: Vec<Box<dyn ProcessStep>>,
    working_dir: PathBuf,
}

impl JarProcessor {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        JarProcessor {
            steps: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    pub fn add_step(&mut self, step: impl ProcessStep + 'static) {
        self.steps.push(Box::new(step));
    }

    pub fn clear_steps(&mut self) {
        self.steps.clear();
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Process a jar, or every accepted jar below a directory. Each
    /// subdirectory is mirrored under the working directory. A failing jar
    /// is reported and does not stop the others.
    pub fn process(
        &mut self,
        input: &Path,
        filter: impl Fn(&Path) -> bool,
    ) -> Result<ProcessReport, JarError> {
        if !input.exists() {
            return Err(JarError::IOError(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", input.display()),
            )));
        }

        let mut report = ProcessReport::default();
        let mut worklist: Vec<(PathBuf, PathBuf)> = vec![(input.to_path_buf(), PathBuf::new())];
        while let Some((path, relative_dir)) = worklist.pop() {
            if path.is_dir() {
                let mut children: Vec<PathBuf> = fs::read_dir(&path)?
                    .map(|entry| entry.map(|e| e.path()))
                    .collect::<Result<_, _>>()?;
                children.sort();
                let child_dir = if path.as_path() == input {
                    relative_dir
                } else {
                    relative_dir.join(file_name(&path)?)
                };
                for child in children.into_iter().rev() {
                    worklist.push((child, child_dir.clone()));
                }
                continue;
            }
            if !filter(&path) {
                continue;
            }
            log::info!("Processing {}", path.display());
            let context = ProcessContext {
                depth: 0,
                working_dir: self.working_dir.join(&relative_dir),
                origin: file_name(&path)?,
            };
            match self.process_jar(&path, context) {
                Ok(output) => report.outputs.push(output),
                Err(e) => {
                    log::error!("Processing {} failed: {}", path.display(), e);
                    report.failures.push((path, e));
                }
            }
        }
        Ok(report)
    }

    fn pre_process(&mut self, input: &Path, context: &ProcessContext) -> Result<PathBuf, JarError> {
        let mut current = input.to_path_buf();
        for step in self.steps.iter_mut() {
            if let Some(result) = step.pre_process(&current, context)? {
                current = result;
            }
        }
        Ok(current)
    }

    fn post_process(&mut self, input: &Path, context: &ProcessContext) -> Result<PathBuf, JarError> {
        let mut current = input.to_path_buf();
        for step in self.steps.iter_mut() {
            if let Some(result) = step.post_process(&current, context)? {
                current = result;
            }
        }
        Ok(current)
    }

    fn recursion_effect(&self, entry_name: &str) -> Option<String> {
        let mut name = entry_name.to_string();
        let mut changed = false;
        for step in &self.steps {
            if let Some(result) = step.recursion_effect(&name) {
                name = result;
                changed = true;
            }
        }
        changed.then_some(name)
    }

    /// Process one jar; returns the path of the result in
    /// `context.working_dir`.
    pub fn process_jar(&mut self, input: &Path, context: ProcessContext) -> Result<PathBuf, JarError> {
        if context.depth > MAX_NESTING_DEPTH {
            return Err(JarError::ArchiveError(format!(
                "{}: nesting deeper than {} levels",
                context.origin, MAX_NESTING_DEPTH
            )));
        }
        let modified = fs::metadata(input)?.modified()?;
        fs::create_dir_all(&context.working_dir)?;

        let working_file = self.pre_process(input, &context)?;
        let name = file_name(&working_file)?;
        let temp_dir = tempfile::Builder::new()
            .prefix(&format!("temp_{}_{}_", context.depth, name))
            .tempdir_in(&context.working_dir)?;

        let mut archive = ZipArchive::new(BufReader::new(File::open(&working_file)?))?;
        let replacements = self.extract_entries(&mut archive, temp_dir.path(), &context)?;

        let rewritten = temp_dir.path().join(&name);
        recreate_jar(&mut archive, &rewritten, &replacements, temp_dir.path())?;
        drop(archive);
        if working_file != input {
            fs::remove_file(&working_file)?;
        }

        let result = self.post_process(&rewritten, &context)?;
        let final_path = context.working_dir.join(file_name(&result)?);
        if result != final_path {
            if final_path.exists() {
                fs::remove_file(&final_path)?;
            }
            fs::rename(&result, &final_path)?;
        }
        File::options()
            .write(true)
            .open(&final_path)?
            .set_modified(modified)?;
        temp_dir.close()?;
        log::debug!("{} -> {}", context.origin, final_path.display());
        Ok(final_path)
    }

    /// Extract and recursively process the entries some step asks for.
    /// Returns `(entry name, replacement name)` pairs.
    fn extract_entries(
        &mut self,
        archive: &mut ZipArchive<BufReader<File>>,
        temp_dir: &Path,
        context: &ProcessContext,
    ) -> Result<Vec<(String, String)>, JarError> {
        let mut replacements = Vec::new();
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let Some(new_name) = self.recursion_effect(&name) else {
                continue;
            };
            let relative = enclosed_path(&name).ok_or_else(|| {
                JarError::ArchiveError(format!("entry '{}' escapes the extraction directory", name))
            })?;
            let extracted = temp_dir.join(&relative);
            let parent = extracted.parent().unwrap_or(temp_dir).to_path_buf();
            fs::create_dir_all(&parent)?;
            {
                let mut out = BufWriter::new(File::create(&extracted)?);
                io::copy(&mut entry, &mut out)?;
                out.flush()?;
            }
            drop(entry);

            let nested = context.nested(parent, &name);
            self.process_jar(&extracted, nested)?;
            if enclosed_path(&new_name).is_none() {
                return Err(JarError::ArchiveError(format!(
                    "replacement '{}' escapes the extraction directory",
                    new_name
                )));
            }
            replacements.push((name, new_name));
        }
        Ok(replacements)
    }
}

/// Write `output` with every entry of `archive`, substituting the entries
/// named in `replacements` with files from `directory`.
fn recreate_jar(
    archive: &mut ZipArchive<BufReader<File>>,
    output: &Path,
    replacements: &[(String, String)],
    directory: &Path,
) -> Result<(), JarError> {
    let mut writer = ZipWriter::new(BufWriter::new(File::create(output)?));
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        let replacement = replacements
            .iter()
            .find(|(name, _)| name == entry.name())
            .map(|(_, new_name)| new_name.clone());
        match replacement {
            None => writer.raw_copy_file(entry)?,
            Some(new_name) => {
                let options = FileOptions::<()>::default().compression_method(entry.compression());
                drop(entry);
                let source = enclosed_path(&new_name)
                    .map(|relative| directory.join(relative))
                    .ok_or_else(|| {
                        JarError::ArchiveError(format!("invalid replacement '{}'", new_name))
                    })?;
                writer.start_file(new_name, options)?;
                io::copy(&mut BufReader::new(File::open(&source)?), &mut writer)?;
            }
        }
    }
    writer.finish()?.flush()?;
    Ok(())
}

/// Record of one jar checked by [`VerifyNestedStep`].
#[derive(Debug, Clone, Serialize)]
pub struct NestedVerification {
    pub origin: String,
    pub depth: usize,
    pub result: VerificationResult,
}

pub type NestedResults = Arc<Mutex<Vec<NestedVerification>>>;

/// Verifies every jar the processor touches, nested ones included.
pub struct VerifyNestedStep {
    verifier: JarVerifier,
    results: NestedResults,
}

impl VerifyNestedStep {
    pub fn new(verifier: JarVerifier) -> Self {
        VerifyNestedStep {
            verifier,
            results: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle on the recorded results; stays valid after the step has been
    /// handed to a processor.
    pub fn results(&self) -> NestedResults {
        self.results.clone()
    }
}

impl ProcessStep for VerifyNestedStep {
    fn pre_process(
        &mut self,
        input: &Path,
        context: &ProcessContext,
    ) -> Result<Option<PathBuf>, JarError> {
        let result = self.verifier.verify(input);
        log::info!("{}: {}", context.origin, result);
        self.results
            .lock()
            .map_err(|_| JarError::InternalError("Lock poisoned".to_string()))?
            .push(NestedVerification {
                origin: context.origin.clone(),
                depth: context.depth,
                result,
            });
        Ok(None)
    }

    fn recursion_effect(&self, entry_name: &str) -> Option<String> {
        jar_filter(Path::new(entry_name)).then(|| entry_name.to_string())
    }
}
