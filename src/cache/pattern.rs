/// Matches `key` against a wildcard `pattern` where `*` stands for any run of
/// characters (including none). Every other character matches itself.
pub fn matches(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0, 0);
    // position of the last `*` seen and the key index it was tried against
    let mut backtrack: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ki));
            pi += 1;
        } else if pi < p.len() && p[pi] == k[ki] {
            pi += 1;
            ki += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ki = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::matches;

    #[test]
    fn test_suffix_wildcard() {
        assert!(matches("orders:list:*", "orders:list:page:1"));
        assert!(matches("orders:list:*", "orders:list:"));
        assert!(!matches("orders:list:*", "orders:detail:42"));
        assert!(!matches("orders:list:*", "drivers:list:all"));
    }

    #[test]
    fn test_inner_wildcards() {
        assert!(matches("*:list:*", "drivers:list:all"));
        assert!(matches("orders:*:42", "orders:detail:42"));
        assert!(!matches("orders:*:42", "orders:detail:43"));
        assert!(matches("a*b*c", "aXXbYYc"));
        assert!(!matches("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_exact_without_wildcard() {
        assert!(matches("zones", "zones"));
        assert!(!matches("zones", "zones:1"));
        assert!(matches("*", ""));
    }
}
