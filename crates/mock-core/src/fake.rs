//! Data-function registry for `{{…}}` placeholders.
//!
//! The registry is built once and shared process-wide; every generator is a
//! plain `fn` and safe to call concurrently. Values only need to look
//! plausible for the declared shape (a 36-char v4 UUID, a 32-char hex hash,
//! an RFC 3339 timestamp, lorem prose and so on).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use uuid::Uuid;

type Generator = fn() -> String;

static REGISTRY: Lazy<HashMap<&'static str, Generator>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, Generator> = HashMap::new();
    m.insert("name", full_name);
    m.insert("firstName", first_name);
    m.insert("lastName", last_name);
    m.insert("email", email);
    m.insert("user", user);
    m.insert("url", url);
    m.insert("server", server);
    m.insert("hash", hash);
    m.insert("phone", phone);
    m.insert("bool", boolean);
    m.insert("uuid", uuid_v4);
    m.insert("guid", uuid_v4);
    m.insert("timestamp", timestamp);
    m.insert("isoTimestamp", iso_timestamp);
    m.insert("integer", integer);
    m.insert("float", float);
    m.insert("file", file_path);
    m.insert("sentence", sentence);
    m.insert("paragraph", paragraph);
    m.insert("article", article);
    m
});

/// Invoke a registered data function. `None` when the name is unknown.
pub fn invoke(name: &str) -> Option<String> {
    REGISTRY.get(name).map(|generator| generator())
}

pub fn is_registered(name: &str) -> bool {
    REGISTRY.contains_key(name)
}

const FIRST_NAMES: &[&str] = &[
    "Ada", "Alan", "Barbara", "Claude", "Dennis", "Donald", "Edsger", "Frances", "Grace", "Hedy",
    "John", "Katherine", "Ken", "Leslie", "Linus", "Margaret", "Niklaus", "Radia", "Robin",
    "Rosalind", "Sophie", "Tim", "Vint", "Whitfield",
];

const LAST_NAMES: &[&str] = &[
    "Baker", "Berners-Lee", "Carver", "Diffie", "Dijkstra", "Fisher", "Hamilton", "Hopper",
    "Johnson", "Kernighan", "Knuth", "Lamarr", "Lamport", "Liskov", "Lovelace", "Milner",
    "Perlman", "Ritchie", "Shannon", "Stroustrup", "Thompson", "Torvalds", "Turing", "Wirth",
];

const WORDS: &[&str] = &[
    "aliqua", "aliquip", "amet", "anim", "aute", "cillum", "commodo", "consectetur", "consequat",
    "culpa", "cupidatat", "deserunt", "dolor", "dolore", "duis", "eiusmod", "elit", "enim",
    "esse", "est", "excepteur", "exercitation", "fugiat", "incididunt", "ipsum", "irure",
    "labore", "laboris", "laborum", "lorem", "magna", "minim", "mollit", "nisi", "nostrud",
    "nulla", "occaecat", "officia", "pariatur", "proident", "quis", "reprehenderit", "sint",
    "sunt", "tempor", "ullamco", "velit", "veniam", "voluptate",
];

const TLDS: &[&str] = &["com", "net", "org", "io", "dev"];

const FILE_EXTENSIONS: &[&str] = &["txt", "log", "csv", "json", "pdf", "png"];

fn pick(items: &'static [&'static str]) -> &'static str {
    items[rand::thread_rng().gen_range(0..items.len())]
}

fn full_name() -> String {
    format!("{} {}", pick(FIRST_NAMES), pick(LAST_NAMES))
}

fn first_name() -> String {
    pick(FIRST_NAMES).to_string()
}

fn last_name() -> String {
    pick(LAST_NAMES).to_string()
}

fn email() -> String {
    format!(
        "{}.{}@{}",
        pick(FIRST_NAMES).to_lowercase(),
        pick(LAST_NAMES).to_lowercase(),
        domain()
    )
}

fn user() -> String {
    format!(
        "{}{}",
        pick(FIRST_NAMES).to_lowercase(),
        rand::thread_rng().gen_range(1..100)
    )
}

fn domain() -> String {
    format!("{}.{}", pick(WORDS), pick(TLDS))
}

fn server() -> String {
    domain()
}

fn url() -> String {
    format!("https://{}/{}", domain(), pick(WORDS))
}

fn hash() -> String {
    let mut rng = rand::thread_rng();
    (0..16).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}

fn phone() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "({:03}) {:03}-{:04}",
        rng.gen_range(200..1000),
        rng.gen_range(200..1000),
        rng.gen_range(0..10000)
    )
}

fn boolean() -> String {
    if rand::thread_rng().gen() { "true" } else { "false" }.to_string()
}

fn uuid_v4() -> String {
    Uuid::new_v4().to_string()
}

// a random moment within the last year
fn random_past() -> DateTime<Utc> {
    let offset = rand::thread_rng().gen_range(0..365 * 24 * 3600);
    Utc::now() - chrono::Duration::seconds(offset)
}

fn timestamp() -> String {
    random_past().timestamp().to_string()
}

fn iso_timestamp() -> String {
    random_past().to_rfc3339()
}

fn integer() -> String {
    rand::thread_rng().gen_range(0..=65535u32).to_string()
}

fn float() -> String {
    format!("{:.2}", rand::thread_rng().gen::<f64>() * 100_000.0)
}

fn file_path() -> String {
    format!(
        "/{}/{}/{}.{}",
        pick(WORDS),
        pick(WORDS),
        pick(WORDS),
        pick(FILE_EXTENSIONS)
    )
}

fn sentence_of(words: usize) -> String {
    let mut out = String::new();
    for i in 0..words {
        let word = pick(WORDS);
        if i == 0 {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(chars.as_str());
            }
        } else {
            out.push(' ');
            out.push_str(word);
        }
    }
    out.push('.');
    out
}

fn paragraph_of(sentences: usize) -> String {
    (0..sentences)
        .map(|_| sentence_of(rand::thread_rng().gen_range(8..15)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn sentence() -> String {
    sentence_of(14)
}

fn paragraph() -> String {
    format!("{} {} {}", sentence_of(12), sentence_of(14), sentence_of(10))
}

fn article() -> String {
    format!("{}\n\n{}\n\n{}\n", paragraph_of(2), paragraph_of(3), paragraph_of(2))
}
