//! Text segmentation into speakable chunks.

/// Default upper bound for one chunk, in characters.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 300;

/// Splits raw text into an ordered sequence of chunk texts.
///
/// Implementations must be pure and deterministic; an empty result is allowed.
pub trait Splitter: Send + Sync {
    fn split(&self, text: &str) -> Vec<String>;
}

/// Sentence-aware splitter that packs whole sentences into chunks of at most
/// `max_chars` characters.
///
/// A sentence longer than the limit is wrapped at word boundaries; a single
/// word longer than the limit becomes its own chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentenceSplitter {
    max_chars: usize,
}

impl SentenceSplitter {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    pub const fn max_chars(&self) -> usize {
        self.max_chars
    }

    fn sentences(text: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut current = String::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '\n' && chars.peek() == Some(&'\n') {
                // Paragraph break always ends a sentence
                push_sentence(&mut sentences, &mut current);
                continue;
            }
            current.push(c);
            if matches!(c, '.' | '!' | '?' | '…') {
                // Swallow trailing closers like quotes and brackets
                while let Some(&next) = chars.peek() {
                    if matches!(next, '"' | '\'' | ')' | ']' | '”' | '’' | '.' | '!' | '?') {
                        current.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if chars.peek().map_or(true, |n| n.is_whitespace()) {
                    push_sentence(&mut sentences, &mut current);
                }
            }
        }
        push_sentence(&mut sentences, &mut current);
        sentences
    }

    fn wrap_words(&self, sentence: &str, out: &mut Vec<String>) {
        let mut line = String::new();
        for word in sentence.split_whitespace() {
            if !line.is_empty() && char_len(&line) + 1 + char_len(word) > self.max_chars {
                out.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        if !line.is_empty() {
            out.push(line);
        }
    }
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_CHARS)
    }
}

impl Splitter for SentenceSplitter {
    fn split(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        for sentence in Self::sentences(text) {
            if char_len(&sentence) > self.max_chars {
                self.wrap_words(&sentence, &mut pieces);
            } else {
                pieces.push(sentence);
            }
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        for piece in pieces {
            if !current.is_empty() && char_len(&current) + 1 + char_len(&piece) > self.max_chars {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&piece);
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let normalized = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !normalized.is_empty() {
        sentences.push(normalized);
    }
    current.clear();
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
