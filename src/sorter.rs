//! Slice ordering by InstanceNumber.

use serde::Serialize;

/// Parse an InstanceNumber the lenient way: the leading signed integer of the
/// trimmed value, `0` when there is none.
pub fn parse_instance_number(raw: &str) -> i32 {
    let trimmed = raw.trim();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i32>().map_or(0, |n| sign * n)
}

/// Bijection between acquisition (input) order and sorted order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SliceOrderMap {
    sorted_to_original: Vec<usize>,
    original_to_sorted: Vec<usize>,
}

impl SliceOrderMap {
    fn from_sorted(sorted_to_original: Vec<usize>) -> Self {
        let mut original_to_sorted = vec![0; sorted_to_original.len()];
        for (sorted, &original) in sorted_to_original.iter().enumerate() {
            original_to_sorted[original] = sorted;
        }
        Self {
            sorted_to_original,
            original_to_sorted,
        }
    }

    pub fn len(&self) -> usize {
        self.sorted_to_original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted_to_original.is_empty()
    }

    /// Original index of every slice, in sorted order.
    pub fn originals(&self) -> impl Iterator<Item = usize> + '_ {
        self.sorted_to_original.iter().copied()
    }

    pub fn original_of(&self, sorted: usize) -> Option<usize> {
        self.sorted_to_original.get(sorted).copied()
    }

    pub fn sorted_of(&self, original: usize) -> Option<usize> {
        self.original_to_sorted.get(original).copied()
    }
}

#[derive(Debug, Clone)]
pub struct SortedSlices<T> {
    pub items: Vec<T>,
    pub instance_numbers: Vec<i32>,
    /// The first input is now last and the last input is now first.
    pub reversed: bool,
    /// Any item changed position.
    pub resorted: bool,
    pub order: SliceOrderMap,
}

/// Stable sort by ascending instance number.
///
/// Reversal is a first/last swap check, a heuristic for flipped acquisition
/// order rather than a general monotonicity test.
pub fn sort_by_instance_number<T>(
    items: Vec<T>,
    instance_number: impl Fn(&T) -> i32,
) -> SortedSlices<T> {
    let mut keyed: Vec<(usize, i32, T)> = items
        .into_iter()
        .enumerate()
        .map(|(original, item)| (original, instance_number(&item), item))
        .collect();
    keyed.sort_by_key(|(_, n, _)| *n);

    let len = keyed.len();
    let sorted_to_original: Vec<usize> = keyed.iter().map(|(original, _, _)| *original).collect();
    let reversed = len > 1 && sorted_to_original[len - 1] == 0 && sorted_to_original[0] == len - 1;
    let resorted = sorted_to_original
        .iter()
        .enumerate()
        .any(|(sorted, &original)| sorted != original);

    let mut instance_numbers = Vec::with_capacity(len);
    let mut sorted = Vec::with_capacity(len);
    for (_, n, item) in keyed {
        instance_numbers.push(n);
        sorted.push(item);
    }

    SortedSlices {
        items: sorted,
        instance_numbers,
        reversed,
        resorted,
        order: SliceOrderMap::from_sorted(sorted_to_original),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parses_instance_numbers_leniently() {
        assert_eq!(parse_instance_number("12"), 12);
        assert_eq!(parse_instance_number(" 7 "), 7);
        assert_eq!(parse_instance_number("-3"), -3);
        assert_eq!(parse_instance_number("12.5"), 12);
        assert_eq!(parse_instance_number(""), 0);
        assert_eq!(parse_instance_number("abc"), 0);
    }

    #[test]
    fn detects_reversed_input() {
        let sorted = sort_by_instance_number(vec![3, 2, 1], |n| *n);
        assert_eq!(sorted.items, vec![1, 2, 3]);
        assert!(sorted.reversed);
        assert!(sorted.resorted);
        assert_eq!(sorted.order.sorted_of(0), Some(2));
        assert_eq!(sorted.order.sorted_of(1), Some(1));
        assert_eq!(sorted.order.sorted_of(2), Some(0));
        assert_eq!(sorted.order.original_of(0), Some(2));
    }

    #[test]
    fn partial_shuffle_is_not_a_reversal() {
        let sorted = sort_by_instance_number(vec![2, 1, 3], |n| *n);
        assert!(!sorted.reversed);
        assert!(sorted.resorted);

        let single = sort_by_instance_number(vec![5], |n| *n);
        assert!(!single.reversed);
        assert!(!single.resorted);
    }

    #[test]
    fn ties_keep_input_order() {
        let sorted = sort_by_instance_number(vec![("b", 1), ("a", 0), ("c", 1)], |(_, n)| *n);
        let names: Vec<_> = sorted.items.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    proptest! {
        #[test]
        fn sorted_instance_numbers_never_decrease(numbers in proptest::collection::vec(-50i32..50, 0..40)) {
            let sorted = sort_by_instance_number(numbers.clone(), |n| *n);
            prop_assert!(sorted.instance_numbers.windows(2).all(|pair| pair[0] <= pair[1]));
            prop_assert_eq!(sorted.order.len(), numbers.len());
            for original in 0..numbers.len() {
                let position = sorted.order.sorted_of(original).unwrap();
                prop_assert_eq!(sorted.order.original_of(position), Some(original));
            }
        }
    }
}
