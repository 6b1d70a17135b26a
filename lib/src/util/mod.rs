/// Convert spaces to hyphens. Remove characters that aren't alphanumerics,
/// underscores, or hyphens. Convert to lowercase. Also strip leading and
/// trailing whitespace.
pub fn slugify(string: &str) -> String {
    let mut output = String::with_capacity(string.len());

    let mut need_dash = false;
    for ch in string.chars() {
        let mapped = match deunicode::deunicode_char(ch) {
            Some(s) if !s.is_empty() && !ch.is_control() => s,
            _ => "-",
        };

        for b in mapped.bytes() {
            match b {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' => {
                    if need_dash {
                        output.push('-');
                        need_dash = false;
                    }

                    output.push(b.to_ascii_lowercase() as char);
                }
                _ => {
                    // All sequences of characters that aren't alphanumeric or
                    // `_` are collapsed into one `-`.
                    need_dash = !output.is_empty();
                }
            }
        }
    }

    output
}

/// Turns a category slug into a display title: words are split at
/// non-alphanumerics and at lower-to-upper case changes, then capitalized.
///
/// ```rust
/// use larder::util::category_title;
///
/// assert_eq!(category_title("main-dishes"), "Main Dishes");
/// assert_eq!(category_title("quickAndEasy"), "Quick And Easy");
/// assert_eq!(category_title("BBQ_sauce"), "Bbq Sauce");
/// ```
pub fn category_title(slug: &str) -> String {
    let mut words: Vec<String> = vec![];
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in slug.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }

            prev_lower = false;
            continue;
        }

        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }

        prev_lower = ch.is_lowercase() || ch.is_numeric();
        current.push(ch);
    }

    if !current.is_empty() {
        words.push(current);
    }

    words.iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Returns `true` if `input` is likely to contain a template.
pub fn is_template(input: &str) -> bool {
    let mut slice = input.as_bytes();
    while let Some(i) = memchr::memchr(b'{', slice) {
        match slice.get(i + 1) {
            Some(b'{') | Some(b'%') => return true,
            Some(_) => slice = &slice[(i + 1)..],
            None => return false,
        }
    }

    false
}
