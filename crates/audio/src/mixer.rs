//! Sample mixing

/// Mix sources by averaging.
///
/// The output is as long as the longest source; shorter sources count as
/// silence past their end. Dividing by the number of sources keeps the sum
/// inside the 16-bit range, so the result never clips.
pub fn mix_mean(sources: &[&[i16]]) -> Vec<i16> {
    let len = sources.iter().map(|s| s.len()).max().unwrap_or(0);
    if sources.is_empty() {
        return Vec::new();
    }
    let count = sources.len() as i32;

    (0..len)
        .map(|i| {
            let sum: i32 = sources
                .iter()
                .map(|s| s.get(i).copied().unwrap_or(0) as i32)
                .sum();
            (sum / count) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_mean_of_two() {
        let tone: [i16; 3] = [100, -200, 300];
        let noise: [i16; 3] = [50, 50, -50];
        assert_eq!(mix_mean(&[&tone[..], &noise[..]]), vec![75, -75, 125]);
    }

    #[test]
    fn test_shorter_source_padded_with_silence() {
        let long: [i16; 4] = [1000; 4];
        let short: [i16; 2] = [1000; 2];
        assert_eq!(mix_mean(&[&long[..], &short[..]]), vec![1000, 1000, 500, 500]);
    }

    #[test]
    fn test_single_source_unchanged() {
        let only: [i16; 3] = [1, 2, 3];
        assert_eq!(mix_mean(&[&only[..]]), vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(mix_mean(&[]).is_empty());
        let empty: [i16; 0] = [];
        assert!(mix_mean(&[&empty[..], &empty[..]]).is_empty());
    }

    #[test]
    fn test_extremes_do_not_overflow() {
        let max = [i16::MAX; 2];
        let min = [i16::MIN; 2];
        assert_eq!(mix_mean(&[&max[..], &max[..]]), vec![i16::MAX; 2]);
        assert_eq!(mix_mean(&[&min[..], &min[..]]), vec![i16::MIN; 2]);
    }

    #[quickcheck]
    fn prop_mix_stays_within_source_bounds(a: Vec<i16>, b: Vec<i16>) -> bool {
        let mixed = mix_mean(&[&a[..], &b[..]]);
        mixed.len() == a.len().max(b.len())
            && mixed.iter().enumerate().all(|(i, &m)| {
                let x = a.get(i).copied().unwrap_or(0);
                let y = b.get(i).copied().unwrap_or(0);
                m >= x.min(y) && m <= x.max(y)
            })
    }
}
