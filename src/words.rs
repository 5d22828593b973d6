use include_dir::{include_dir, Dir};
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::WordSupplyError;

static BANK_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/lang");

/// Anything that can hand out words on demand.
///
/// Implementations may block; callers run them off the thread that owns the
/// challenge.
pub trait WordSupply: Send + Sync {
    /// Returns at most `count` words.
    fn request_words(&self, count: usize) -> Result<Vec<String>, WordSupplyError>;
}

/// A fixed word bank, shuffled and drawn from in rounds.
#[derive(Deserialize, Clone, Debug)]
pub struct WordBank {
    pub name: String,
    pub size: u32,
    pub words: Vec<String>,
    #[serde(skip)]
    pub max_word_length: Option<usize>,
}

impl WordBank {
    /// Loads a bank shipped with the crate, e.g. `"english"`.
    pub fn embedded(name: &str) -> Result<Self, WordSupplyError> {
        let file = BANK_DIR
            .get_file(format!("{name}.json"))
            .ok_or_else(|| WordSupplyError::UnknownBank(name.to_string()))?;
        let contents = file
            .contents_utf8()
            .ok_or_else(|| WordSupplyError::UnknownBank(name.to_string()))?;
        Ok(serde_json::from_str(contents)?)
    }

    pub fn from_words<S: Into<String>>(name: &str, words: impl IntoIterator<Item = S>) -> Self {
        let words: Vec<String> = words.into_iter().map(Into::into).collect();
        Self {
            name: name.to_string(),
            size: words.len() as u32,
            words,
            max_word_length: None,
        }
    }

    pub fn with_max_word_length(mut self, max: Option<usize>) -> Self {
        self.max_word_length = max;
        self
    }

    /// Samples `count` entries, skipping words longer than `max_word_length`
    /// characters. No word repeats until every eligible word has been drawn.
    pub fn sample(&self, count: usize, max_word_length: Option<usize>) -> Vec<String> {
        let eligible: Vec<&String> = self
            .words
            .iter()
            .filter(|w| max_word_length.map_or(true, |max| w.chars().count() <= max))
            .collect();
        let mut rng = rand::thread_rng();
        let mut sampled = Vec::with_capacity(count);
        if eligible.is_empty() {
            return sampled;
        }
        while sampled.len() < count {
            let take = (count - sampled.len()).min(eligible.len());
            sampled.extend(eligible.choose_multiple(&mut rng, take).map(|w| (*w).clone()));
        }
        sampled
    }
}

impl WordSupply for WordBank {
    fn request_words(&self, count: usize) -> Result<Vec<String>, WordSupplyError> {
        Ok(self.sample(count, self.max_word_length))
    }
}

/// Client for the remote word endpoint:
/// `GET {url}?count=N[&maxWordLength=M]` returning a JSON array of strings.
#[derive(Debug, Clone)]
pub struct HttpWordSupply {
    client: reqwest::blocking::Client,
    url: String,
    max_word_length: Option<usize>,
}

impl HttpWordSupply {
    pub fn new(url: impl Into<String>, max_word_length: Option<usize>) -> Result<Self, WordSupplyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            max_word_length,
        })
    }

    fn query(&self, count: usize) -> Vec<(&'static str, String)> {
        let mut query = vec![("count", count.to_string())];
        if let Some(max) = self.max_word_length {
            query.push(("maxWordLength", max.to_string()));
        }
        query
    }
}

impl WordSupply for HttpWordSupply {
    fn request_words(&self, count: usize) -> Result<Vec<String>, WordSupplyError> {
        let response = self.client.get(&self.url).query(&self.query(count)).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(WordSupplyError::Status(status.as_u16()));
        }
        let body = response.text()?;
        let mut words: Vec<String> = serde_json::from_str(&body)?;
        words.truncate(count);
        debug!(requested = count, received = words.len(), "fetched words");
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashSet;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serves one HTTP response and hands back the request line.
    fn serve_once(status: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/words", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            request_line
        });
        (url, handle)
    }

    #[test]
    fn embedded_english_bank_loads() {
        let bank = WordBank::embedded("english").unwrap();
        assert_eq!(bank.name, "english");
        assert_eq!(bank.size as usize, bank.words.len());
        assert!(!bank.words.is_empty());
    }

    #[test]
    fn unknown_bank_is_an_error() {
        assert_matches!(
            WordBank::embedded("klingon"),
            Err(WordSupplyError::UnknownBank(name)) if name == "klingon"
        );
    }

    #[test]
    fn sample_exhausts_the_bank_before_repeating() {
        let bank = WordBank::from_words("test", ["a", "b", "c", "d"]);
        let words = bank.sample(10, None);

        assert_eq!(words.len(), 10);
        let distinct: HashSet<_> = words[..4].iter().collect();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn sample_respects_max_word_length() {
        let bank = WordBank::from_words("test", ["tiny", "enormous", "big"]);
        let words = bank.sample(3, Some(4));

        assert_eq!(words.len(), 3);
        assert!(words.iter().all(|w| w.len() <= 4));
    }

    #[test]
    fn http_supply_sends_query_and_decodes() {
        let (url, server) = serve_once("200 OK", r#"["alpha","beta"]"#);
        let supply = HttpWordSupply::new(url, Some(6)).unwrap();

        let words = supply.request_words(2).unwrap();

        assert_eq!(words, vec!["alpha", "beta"]);
        let request_line = server.join().unwrap();
        assert!(request_line.starts_with("GET /words?count=2&maxWordLength=6 "));
    }

    #[test]
    fn http_supply_maps_non_success_status() {
        let (url, server) = serve_once("503 Service Unavailable", "[]");
        let supply = HttpWordSupply::new(url, None).unwrap();

        assert_matches!(supply.request_words(5), Err(WordSupplyError::Status(503)));
        server.join().unwrap();
    }

    #[test]
    fn http_supply_rejects_malformed_body() {
        let (url, server) = serve_once("200 OK", r#"{"words":1}"#);
        let supply = HttpWordSupply::new(url, None).unwrap();

        assert_matches!(supply.request_words(5), Err(WordSupplyError::Decode(_)));
        server.join().unwrap();
    }
}
