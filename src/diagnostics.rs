use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

// [Error] filename.tex:9: Message...
static DIRECT_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[Error\] ([^:]+):(\d+): (.*)").expect("valid regex"));
// Standard TeX errors "! ..." and engine errors "error: ..."
static TEX_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:!|error:)(.*)").expect("valid regex"));
static LINE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^l\.(\d+)(.*)").expect("valid regex"));
// `(./chapter.tex` at the start of the slice: TeX opening a file
static FILE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(([^()\s]+\.(?:tex|sty|cls))").expect("valid regex"));

const LINE_LOOKAHEAD: usize = 10;

/// One error found in a compile log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogDiagnostic {
    pub file: String,
    pub line: Option<u32>,
    pub message: String,
    /// Source text after the `l.<n>` marker, when present.
    pub context: Option<String>,
}

/// Files TeX has opened and not yet closed, following `(` and `)` in the
/// log. Parentheses that don't open a file are tracked as `None` so their
/// closing `)` pops the right level.
#[derive(Default)]
struct OpenFiles(Vec<Option<String>>);

impl OpenFiles {
    fn scan(&mut self, line: &str) {
        for (pos, c) in line.char_indices() {
            match c {
                '(' => {
                    let file = FILE_OPEN.captures(&line[pos..]).map(|caps| caps[1].to_string());
                    self.0.push(file);
                }
                ')' => {
                    self.0.pop();
                }
                _ => {}
            }
        }
    }

    fn innermost(&self) -> Option<&str> {
        self.0.iter().rev().find_map(|f| f.as_deref())
    }
}

/// Extracts errors from a TeX compile log, as returned for a failed render.
pub fn extract_errors(log: &str) -> Vec<LogDiagnostic> {
    let lines: Vec<&str> = log.lines().collect();
    let mut errors = Vec::new();
    let mut open_files = OpenFiles::default();

    for (i, line) in lines.iter().enumerate() {
        let current_file = open_files.innermost().map(str::to_string);
        open_files.scan(line);

        if let Some(caps) = DIRECT_ERROR.captures(line) {
            errors.push(LogDiagnostic {
                file: caps[1].trim().to_string(),
                line: caps[2].parse().ok(),
                message: caps[3].trim().to_string(),
                context: None,
            });
            continue;
        }

        let Some(caps) = TEX_ERROR.captures(line) else {
            continue;
        };
        let message = caps[1].trim().to_string();
        // not an error of its own
        if message.contains("halted on potentially-recoverable error") {
            continue;
        }

        let mut diagnostic = LogDiagnostic {
            file: current_file.unwrap_or_else(|| "unknown".to_string()),
            line: None,
            message,
            context: None,
        };

        for next in lines.iter().skip(i + 1).take(LINE_LOOKAHEAD) {
            if let Some(l_caps) = LINE_MARKER.captures(next) {
                diagnostic.line = l_caps[1].parse().ok();
                diagnostic.context = l_caps.get(2).map(|m| m.as_str().trim().to_string());
                break;
            }
        }

        errors.push(diagnostic);
    }

    errors
}

/// Only the `!` error lines of a log, marker stripped. Mirrors the service's
/// `condensed` error format for logs fetched in `full`.
pub fn condense(log: &str) -> String {
    log.lines()
        .filter(|line| line.starts_with('!'))
        .map(|line| line.trim_start_matches(['!', ' ']))
        .fold(String::new(), |mut out, line| {
            out.push_str(line);
            out.push('\n');
            out
        })
}
