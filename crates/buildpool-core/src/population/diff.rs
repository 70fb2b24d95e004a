//! Line-level difference metric used to reject cosmetic mutations.

/// Fraction of lines changed between `before` and `after`, in `[0, 1]`.
///
/// Computed as `1 - 2·LCS / (n + m)` over the two line sequences, where LCS is
/// the longest common subsequence of lines. Identical texts score 0, texts
/// sharing no line score 1. Two empty texts score 0.
pub fn line_change_ratio(before: &str, after: &str) -> f64 {
    let a: Vec<&str> = before.lines().collect();
    let b: Vec<&str> = after.lines().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 0.0;
    }

    let common = lcs_len(&a, &b);
    1.0 - (2 * common) as f64 / total as f64
}

/// Longest common subsequence length with two rolling rows.
fn lcs_len(a: &[&str], b: &[&str]) -> usize {
    // Keep the shorter sequence on the inner axis to bound memory.
    let (outer, inner) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    if inner.is_empty() {
        return 0;
    }

    let mut prev = vec![0usize; inner.len() + 1];
    let mut curr = vec![0usize; inner.len() + 1];

    for line in outer {
        for (j, other) in inner.iter().enumerate() {
            curr[j + 1] = if line == other {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[inner.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> String {
        (0..n).map(|i| format!("line {i}\n")).collect()
    }

    #[test]
    fn test_identical_texts_have_zero_delta() {
        let text = numbered(20);
        assert_eq!(line_change_ratio(&text, &text), 0.0);
        assert_eq!(line_change_ratio("", ""), 0.0);
    }

    #[test]
    fn test_disjoint_texts_have_full_delta() {
        assert_eq!(line_change_ratio("a\nb\n", "c\nd\n"), 1.0);
        assert_eq!(line_change_ratio("", "a\n"), 1.0);
    }

    #[test]
    fn test_three_of_hundred_lines_changed_is_three_percent() {
        let before = numbered(100);
        let after: String = (0..100)
            .map(|i| {
                if i < 3 {
                    format!("rewritten {i}\n")
                } else {
                    format!("line {i}\n")
                }
            })
            .collect();
        let ratio = line_change_ratio(&before, &after);
        assert!((ratio - 0.03).abs() < 1e-9, "ratio was {ratio}");
    }

    #[test]
    fn test_insertions_count_against_similarity() {
        let before = numbered(10);
        let after = format!("{before}extra a\nextra b\n");
        // LCS = 10, total = 22 -> 1 - 20/22
        let ratio = line_change_ratio(&before, &after);
        assert!((ratio - (1.0 - 20.0 / 22.0)).abs() < 1e-9);
    }

    #[test]
    fn test_symmetric() {
        let a = "x\ny\nz\n";
        let b = "y\nq\nz\nw\n";
        assert_eq!(line_change_ratio(a, b), line_change_ratio(b, a));
    }
}
