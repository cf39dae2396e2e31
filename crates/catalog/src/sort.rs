//! Catalog ordering.
//!
//! Directory markers (names beginning with `*`) sort ahead of every preset
//! regardless of alphabet; everything else is case-insensitive lexicographic.
//! A stable bottom-up merge sort keeps equal names in scan order.

use std::cmp::Ordering;

use crate::PresetInfo;

pub(crate) fn compare(a: &str, b: &str) -> Ordering {
    let a_dir = a.starts_with('*');
    let b_dir = b.starts_with('*');
    if a_dir != b_dir {
        return if a_dir { Ordering::Less } else { Ordering::Greater };
    }
    let a_lower = a.to_ascii_lowercase();
    let b_lower = b.to_ascii_lowercase();
    a_lower.cmp(&b_lower)
}

pub(crate) fn merge_sort(entries: &mut Vec<PresetInfo>) {
    let len = entries.len();
    if len < 2 {
        return;
    }
    let mut buf: Vec<PresetInfo> = Vec::with_capacity(len);
    let mut width = 1;
    while width < len {
        let mut start = 0;
        while start < len {
            let mid = (start + width).min(len);
            let end = (start + 2 * width).min(len);
            merge(&entries[start..mid], &entries[mid..end], &mut buf);
            entries.splice(start..end, buf.drain(..));
            start = end;
        }
        width *= 2;
    }
}

fn merge(left: &[PresetInfo], right: &[PresetInfo], out: &mut Vec<PresetInfo>) {
    let mut li = 0;
    let mut ri = 0;
    while li < left.len() && ri < right.len() {
        if compare(&left[li].name, &right[ri].name) == Ordering::Greater {
            out.push(right[ri].clone());
            ri += 1;
        } else {
            out.push(left[li].clone());
            li += 1;
        }
    }
    out.extend_from_slice(&left[li..]);
    out.extend_from_slice(&right[ri..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str) -> PresetInfo {
        PresetInfo {
            name: name.to_string(),
            rating: 3.0,
            rating_cum: 0.0,
        }
    }

    #[test]
    fn directories_sort_first() {
        let mut entries = vec![info("aaa.milk"), info("*zzz"), info("Bbb.milk"), info("*Art")];
        merge_sort(&mut entries);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["*Art", "*zzz", "aaa.milk", "Bbb.milk"]);
    }

    #[test]
    fn comparison_ignores_case() {
        assert_eq!(compare("Alpha.milk", "alpha.milk"), Ordering::Equal);
        assert_eq!(compare("beta.milk", "Alpha.milk"), Ordering::Greater);
    }

    #[test]
    fn sort_handles_large_unaligned_lengths() {
        let mut entries: Vec<PresetInfo> =
            (0..97).rev().map(|i| info(&format!("p{i:03}.milk"))).collect();
        merge_sort(&mut entries);
        for pair in entries.windows(2) {
            assert_ne!(compare(&pair[0].name, &pair[1].name), Ordering::Greater);
        }
    }
}
