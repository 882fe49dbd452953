/// Line comparison passes, strictest first.
const PASSES: [fn(&str, &str) -> bool; 4] = [exact, trailing_trimmed, trimmed, normalized];

fn exact(line: &str, pattern: &str) -> bool {
    line == pattern
}

fn trailing_trimmed(line: &str, pattern: &str) -> bool {
    line.trim_end() == pattern.trim_end()
}

fn trimmed(line: &str, pattern: &str) -> bool {
    line.trim() == pattern.trim()
}

fn normalized(line: &str, pattern: &str) -> bool {
    normalize_punctuation(line) == normalize_punctuation(pattern)
}

/// Find `pattern` as a contiguous run inside `lines`, starting at or after
/// `start`, and return the index of its first line.
///
/// Each comparison pass scans the whole range before a looser pass is tried.
/// With `eof` set, a match anchored at the very end of the file is preferred.
/// An empty pattern matches at `start`.
pub(crate) fn seek_sequence(
    lines: &[String],
    pattern: &[String],
    start: usize,
    eof: bool,
) -> Option<usize> {
    if pattern.is_empty() {
        return Some(start);
    }
    if pattern.len() > lines.len() {
        return None;
    }

    let last_start = lines.len() - pattern.len();
    if eof {
        let anchored = last_start.max(start);
        if let Some(found) = scan(lines, pattern, anchored, last_start) {
            return Some(found);
        }
    }

    scan(lines, pattern, start, last_start)
}

fn scan(lines: &[String], pattern: &[String], from: usize, to: usize) -> Option<usize> {
    if from > to {
        return None;
    }

    PASSES.iter().find_map(|pass| {
        (from..=to).find(|&index| {
            lines[index..index + pattern.len()]
                .iter()
                .zip(pattern)
                .all(|(line, expected)| pass(line, expected))
        })
    })
}

/// Fold typographic dashes, quotes and spaces to ASCII so that patches
/// written in plain ASCII still locate their context.
fn normalize_punctuation(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| match c {
            '\u{2010}'..='\u{2015}' | '\u{2212}' => '-',
            '\u{2018}'..='\u{201B}' => '\'',
            '\u{201C}'..='\u{201F}' => '"',
            '\u{00A0}' | '\u{2002}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{3000}' => ' ',
            other => other,
        })
        .collect()
}
