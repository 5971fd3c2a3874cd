//! Visual fingerprint rendering.
//!
//! Draws an OpenSSH-style "drunken bishop" randomart box for a fingerprint so
//! two people can compare identities at a glance, plus a side-by-side
//! comparison used by the verification prompt.

use std::fmt::Write;

use sha2::{Digest, Sha256};

use crate::fingerprint::constant_time_str_eq;

/// Inner width of the randomart box.
const WIDTH: usize = 17;
/// Inner height of the randomart box.
const HEIGHT: usize = 9;

/// Cell glyphs ordered by visit count; the last two mark start and end.
const GLYPHS: &[u8] = b" .o+=*BOX@%&#/^SE";

#[allow(clippy::cast_possible_truncation)] // GLYPHS.len() == 17
const START: u8 = GLYPHS.len() as u8 - 2;
#[allow(clippy::cast_possible_truncation)]
const END: u8 = GLYPHS.len() as u8 - 1;

/// Walk the bishop over the grid, two bits per step, and return the visit
/// counts together with the final position.
fn walk(seed: &[u8]) -> ([[u8; WIDTH]; HEIGHT], (usize, usize)) {
    let mut grid = [[0u8; WIDTH]; HEIGHT];
    let (mut col, mut row) = (WIDTH / 2, HEIGHT / 2);

    for byte in seed {
        for step in 0..4 {
            let bits = (byte >> (step * 2)) & 0b11;
            col = if bits & 0b01 == 0 {
                col.saturating_sub(1)
            } else {
                (col + 1).min(WIDTH - 1)
            };
            row = if bits & 0b10 == 0 {
                row.saturating_sub(1)
            } else {
                (row + 1).min(HEIGHT - 1)
            };
            if grid[row][col] < START - 1 {
                grid[row][col] += 1;
            }
        }
    }

    (grid, (col, row))
}

/// Render a randomart box for `fingerprint`, with `title` centred in the top
/// border (truncated to the box width).
pub fn fingerprint_randomart(fingerprint: &str, title: &str) -> String {
    let seed = Sha256::digest(fingerprint.as_bytes());
    let (mut grid, (end_col, end_row)) = walk(&seed);
    grid[HEIGHT / 2][WIDTH / 2] = START;
    grid[end_row][end_col] = END;

    let title: String = title.chars().take(WIDTH).collect();
    let title_len = title.chars().count();
    let left = (WIDTH - title_len) / 2;
    let right = WIDTH - title_len - left;

    let mut out = format!("+{}{title}{}+\n", "-".repeat(left), "-".repeat(right));
    for row in &grid {
        out.push('|');
        out.extend(row.iter().map(|&cell| GLYPHS[usize::from(cell)] as char));
        out.push_str("|\n");
    }
    out.push('+');
    out.push_str(&"-".repeat(WIDTH));
    out.push('+');
    out
}

/// Split a fingerprint into two display lines of four groups each.
pub fn format_fingerprint_display(fingerprint: &str) -> String {
    let groups: Vec<&str> = fingerprint.split_whitespace().collect();
    groups
        .chunks(4)
        .map(|line| line.join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render two fingerprints side by side and report whether they match.
pub fn compare_fingerprints(
    local_fp: &str,
    local_label: &str,
    remote_fp: &str,
    remote_label: &str,
) -> (String, bool) {
    let matches = constant_time_str_eq(local_fp, remote_fp);
    let local_art = fingerprint_randomart(local_fp, local_label);
    let remote_art = fingerprint_randomart(remote_fp, remote_label);

    let mut output = String::new();
    for (left, right) in local_art.lines().zip(remote_art.lines()) {
        let _ = writeln!(output, "{left}  {right}");
    }

    if matches {
        output.push_str("\nFingerprints MATCH");
    } else {
        output.push_str("\nFingerprints DO NOT MATCH - do not pin this identity");
    }

    (output, matches)
}
