use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Source directories owned by this crate. The reference material that may sit
// next to the crate is deliberately not scanned.
const SOURCE_DIRS: [&str; 6] = ["features", "ensemble", "shared", "cli", "tests", "benches"];

// Collects underscore-prefixed bindings found in a single file.
struct UnderscoreCollector {
    violations: Vec<String>,
    file_path: PathBuf,
}

// Collects `#[allow(dead_code)]` attributes found in a single file.
struct DeadCodeCollector {
    violations: Vec<String>,
    file_path: PathBuf,
}

impl UnderscoreCollector {
    fn new(file_path: &Path) -> Self {
        Self {
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} underscore-prefixed variables in {}:\n",
            self.violations.len(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg
            .push_str("\n⚠️ Underscore-prefixed variable names are not allowed in this project.\n");
        error_msg.push_str(
            "   Either use the variable (removing the underscore) or remove it completely.\n",
        );
        Some(error_msg)
    }
}

impl DeadCodeCollector {
    fn new(file_path: &Path) -> Self {
        Self {
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} dead-code allowances in {}:\n",
            self.violations.len(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str("\n⚠️ Silencing the dead-code lint is not allowed in this project.\n");
        error_msg
            .push_str("   Either use the code (removing the attribute) or remove it completely.\n");
        Some(error_msg)
    }
}

impl Sink for UnderscoreCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        let is_pure_comment = line_text.trim_start().starts_with("//");

        // A match between double quotes belongs to a string literal.
        let mut is_in_string = false;
        if line_text.contains('"') {
            for (i, part) in line_text.split('"').enumerate() {
                if i % 2 == 1 && part.contains('_') {
                    is_in_string = true;
                    break;
                }
            }
        }

        if is_pure_comment || is_in_string {
            return Ok(true);
        }

        self.violations.push(format!("{line_number}:{line_text}"));
        Ok(true)
    }
}

impl Sink for DeadCodeCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        self.violations.push(format!("{line_number}:{line_text}"));
        Ok(true)
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    if let Err(e) = scan_sources() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .filter(|dir| Path::new(dir).exists())
        .flat_map(|dir| {
            WalkDir::new(dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
                .map(|e| e.path().to_path_buf())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn scan_sources() -> Result<(), Box<dyn Error>> {
    let underscore_matcher = RegexMatcher::new_line_matcher(r"\b(_[a-zA-Z0-9_]+)\b")?;
    let dead_code_matcher = RegexMatcher::new_line_matcher(r"#\[allow\((.*)dead_code")?;
    let mut searcher = Searcher::new();

    for path in rust_sources() {
        let mut underscores = UnderscoreCollector::new(&path);
        searcher.search_path(&underscore_matcher, &path, &mut underscores)?;
        if let Some(error_message) = underscores.check_and_get_error_message() {
            return Err(error_message.into());
        }

        let mut dead_code = DeadCodeCollector::new(&path);
        searcher.search_path(&dead_code_matcher, &path, &mut dead_code)?;
        if let Some(error_message) = dead_code.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }

    Ok(())
}
