//! Tokenization-aware text splitting and batch packing.
//!
//! Two budgets exist: a per-text token limit (a single text over the limit
//! is split on sentence boundaries, then on character windows of
//! 3×max_tokens as a last resort) and a per-batch budget (texts are
//! greedy-packed into batches whose token sum stays under the budget).
//! Ordering is preserved throughout.

/// Splits text into sentences on `.`, `!`, `?` and `。` boundaries,
/// keeping the terminator with its sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?' | '。') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

/// Splits a string into character windows of at most `window` chars at
/// char boundaries.
fn char_windows(text: &str, window: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(window.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

/// Splits one over-budget text into chunks of at most `max_tokens` tokens.
///
/// Sentence-level packing first; a single sentence over the budget falls
/// back to character windows of 3×max_tokens. Sentences longer than
/// 3×max_tokens characters per window still land in order.
pub fn split_text_by_tokens(
    text: &str,
    max_tokens: usize,
    count_tokens: &dyn Fn(&str) -> usize,
) -> Vec<String> {
    let sentences = split_sentences(text);
    let sentences = if sentences.is_empty() {
        vec![text.to_string()]
    } else {
        sentences
    };

    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    for sentence in sentences {
        let tokens = count_tokens(&sentence);

        if tokens > max_tokens {
            // Oversized sentence: flush the running chunk, then window it.
            if !current.is_empty() {
                chunks.push(current.join(" "));
                current.clear();
                current_tokens = 0;
            }
            chunks.extend(char_windows(&sentence, max_tokens * 3));
            continue;
        }

        if current_tokens + tokens <= max_tokens {
            current.push(sentence);
            current_tokens += tokens;
        } else {
            if !current.is_empty() {
                chunks.push(current.join(" "));
            }
            current_tokens = tokens;
            current = vec![sentence];
        }
    }
    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

/// Packs texts into batches whose token sum stays within `budget`.
///
/// When the total already fits, a single batch with the original texts is
/// returned. Empty texts are dropped; ordering is preserved.
pub fn greedy_pack(
    texts: &[String],
    budget: usize,
    count_tokens: &dyn Fn(&str) -> usize,
) -> Vec<Vec<String>> {
    let total: usize = texts.iter().map(|t| count_tokens(t)).sum();
    if total <= budget {
        return vec![texts.to_vec()];
    }

    let mut batches = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    for text in texts {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let tokens = count_tokens(text);
        if current_tokens + tokens <= budget {
            current.push(text.to_string());
            current_tokens += tokens;
        } else {
            if !current.is_empty() {
                batches.push(current);
            }
            current = vec![text.to_string()];
            current_tokens = tokens;
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Google-style packing: each text must fit `per_text_max` tokens (split when
/// not), and each batch's token sum must fit `batch_budget`.
pub fn pack_with_per_text_split(
    texts: &[String],
    per_text_max: usize,
    batch_budget: usize,
    count_tokens: &dyn Fn(&str) -> usize,
) -> Vec<Vec<String>> {
    let mut batches = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    let mut push = |piece: String,
                    tokens: usize,
                    current: &mut Vec<String>,
                    current_tokens: &mut usize,
                    batches: &mut Vec<Vec<String>>| {
        if *current_tokens + tokens <= batch_budget {
            current.push(piece);
            *current_tokens += tokens;
        } else {
            if !current.is_empty() {
                batches.push(std::mem::take(current));
            }
            *current_tokens = tokens;
            *current = vec![piece];
        }
    };

    for text in texts {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let tokens = count_tokens(text);
        if tokens > per_text_max {
            for piece in split_text_by_tokens(text, per_text_max, count_tokens) {
                let piece_tokens = count_tokens(&piece);
                push(piece, piece_tokens, &mut current, &mut current_tokens, &mut batches);
            }
        } else {
            push(
                text.to_string(),
                tokens,
                &mut current,
                &mut current_tokens,
                &mut batches,
            );
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
