//! Static analysis over generated Python: predicts third-party
//! distributions from imports and pulls missing input filenames out of
//! stderr. Both are best-effort; unreadable input yields no predictions.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Import names that ship with the interpreter and never need installing.
const STDLIB_ALLOWLIST: &[&str] = &[
    "sys",
    "os",
    "json",
    "re",
    "math",
    "itertools",
    "functools",
    "collections",
    "subprocess",
    "pathlib",
    "typing",
    "dataclasses",
    "datetime",
    "time",
    "random",
    "logging",
    "argparse",
    "shutil",
    "tempfile",
    "uuid",
    "hashlib",
    "base64",
    "gzip",
    "bz2",
    "lzma",
    "csv",
    "configparser",
    "enum",
    "statistics",
];

/// Import name → PyPI distribution, where the two differ.
const IMPORT_TO_DIST: &[(&str, &str)] = &[
    ("cv2", "opencv-python"),
    ("PIL", "Pillow"),
    ("sklearn", "scikit-learn"),
    ("bs4", "beautifulsoup4"),
    ("yaml", "PyYAML"),
    ("Crypto", "pycryptodome"),
    ("dateutil", "python-dateutil"),
    ("pdf2image", "pdf2image"),
    ("pdfplumber", "pdfplumber"),
    ("PyPDF2", "PyPDF2"),
    ("openpyxl", "openpyxl"),
    ("reportlab", "reportlab"),
    ("tabula", "tabula-py"),
    ("pandas", "pandas"),
    ("numpy", "numpy"),
];

/// Distributions whose install or import cost earns extra timeout headroom.
pub const HEAVY_DISTRIBUTIONS: &[&str] = &[
    "pandas",
    "numpy",
    "torch",
    "opencv-python",
    "pdfplumber",
    "tabula-py",
    "openpyxl",
];

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

pub fn map_import_to_distribution(import_name: &str) -> String {
    IMPORT_TO_DIST
        .iter()
        .find(|(import, _)| *import == import_name)
        .map(|(_, dist)| (*dist).to_string())
        .unwrap_or_else(|| import_name.to_string())
}

/// Scans `import X.Y` / `from X.Y import Z` statements and returns the
/// sorted unique set of predicted distributions. Relative imports and
/// stdlib names are skipped; a source the scanner cannot read simply
/// yields nothing.
pub fn infer_python_requirements(code: &str) -> Vec<String> {
    let mut distributions = BTreeSet::new();
    for line in code.lines() {
        let statement = line.trim();
        if let Some(rest) = statement.strip_prefix("import ") {
            for part in rest.split(',') {
                if let Some(name) = first_segment(part) {
                    push_distribution(&mut distributions, name);
                }
            }
        } else if let Some(rest) = statement.strip_prefix("from ") {
            if let Some(name) = first_segment(rest) {
                push_distribution(&mut distributions, name);
            }
        }
    }
    distributions.into_iter().collect()
}

/// First dotted segment of the leading module token, or `None` for
/// relative imports and anything that is not an identifier.
fn first_segment(fragment: &str) -> Option<&str> {
    let token = fragment.split_whitespace().next()?;
    if token.starts_with('.') {
        return None;
    }
    let segment = token.split('.').next()?;
    IDENTIFIER.is_match(segment).then_some(segment)
}

fn push_distribution(distributions: &mut BTreeSet<String>, import_name: &str) {
    if STDLIB_ALLOWLIST.contains(&import_name) {
        return;
    }
    distributions.insert(map_import_to_distribution(import_name));
}

pub fn is_heavy_distribution(distribution: &str) -> bool {
    HEAVY_DISTRIBUTIONS.contains(&distribution)
}

const INPUT_EXTENSIONS: &[&str] = &[
    "pdf", "csv", "xls", "xlsx", "txt", "json", "xml", "jpg", "png",
];

static QUOTED_FILENAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"['"]([^'"]+\.(?i:pdf|csv|xls|xlsx|txt|json|xml|jpg|png))['"]"#)
        .expect("quoted filename pattern")
});
static NOT_FOUND_OPERAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:no such file or directory|file not found):\s*['"]?([^\s'"]+)"#)
        .expect("not-found pattern")
});
static INPUT_FILE_OPERAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)input\s+[^'\n]*?file\s+'([^']+)'\s+not\s+found"#)
        .expect("input-file pattern")
});

fn has_known_extension(name: &str) -> bool {
    name.rsplit('.')
        .next()
        .map(|ext| {
            let lowered = ext.to_ascii_lowercase();
            INPUT_EXTENSIONS.contains(&lowered.as_str())
        })
        .unwrap_or(false)
}

/// Filenames the failed program tried and failed to open, sorted unique.
/// A nonempty result means the task is missing inputs the caller must
/// supply; retrying without them is pointless.
pub fn extract_missing_inputs(stderr: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    for capture in QUOTED_FILENAME.captures_iter(stderr) {
        names.insert(capture[1].to_string());
    }
    for capture in NOT_FOUND_OPERAND.captures_iter(stderr) {
        let operand = capture[1].trim_end_matches(['\'', '"']);
        if has_known_extension(operand) {
            names.insert(operand.to_string());
        }
    }
    for capture in INPUT_FILE_OPERAND.captures_iter(stderr) {
        if has_known_extension(&capture[1]) {
            names.insert(capture[1].to_string());
        }
    }
    names.into_iter().collect()
}
