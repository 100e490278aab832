//! Offline script templates.
//!
//! Used as the Content fallback and as the only content backend in test
//! mode. Never touches the network, so it only fails on an empty topic.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{Backend, BackendError, ContentRequest};
use crate::domain::Script;

/// Scripts at or under this length use the short templates
const SHORT_FORM_SECS: u32 = 60;

pub struct TemplateBackend;

impl TemplateBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TemplateBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn short_templates(topic: &str) -> Vec<String> {
    vec![
        format!(
            "Here is something most people never learn about {topic}.\n\n\
             It started smaller than anyone expected.\n\n\
             A few people noticed. Nobody else paid attention.\n\n\
             Then it changed everything around it.\n\n\
             Today, {topic} shows up in places you would never guess.\n\n\
             Remember that the next time you see it."
        ),
        format!(
            "Stop scrolling. This is about {topic}.\n\n\
             You probably think you know how it works.\n\n\
             Most people get one detail completely wrong.\n\n\
             The real story is stranger, and far more interesting.\n\n\
             Once you see it, you cannot unsee it.\n\n\
             Follow for more about {topic}."
        ),
        format!(
            "Three things about {topic} that sound made up.\n\n\
             One. It is older than most people assume.\n\n\
             Two. The people who built it did not expect it to last.\n\n\
             Three. It still surprises the experts today.\n\n\
             Which one did you already know?"
        ),
    ]
}

fn long_templates(topic: &str) -> Vec<String> {
    vec![
        format!(
            "Let's talk about {topic}.\n\n\
             At first glance it looks simple. Most people walk past it every day without a second thought.\n\n\
             But the closer you look, the more questions appear. Where did it come from? Why does it work the way it does?\n\n\
             The story begins with a handful of curious people who refused to accept the obvious answer.\n\n\
             They tested, failed, and tested again. Each failure taught them something new.\n\n\
             Slowly, a picture emerged. {topic} was not an accident. It was the result of countless small decisions.\n\n\
             Some of those decisions were brilliant. Some were lucky. A few were mistakes that turned out to matter most.\n\n\
             Today, {topic} shapes more of our world than we realize.\n\n\
             And the most interesting chapter may still be ahead of us."
        ),
        format!(
            "Everyone has heard of {topic}. Very few people know the full story.\n\n\
             It is a story of persistence, coincidence, and a surprising amount of trial and error.\n\n\
             In the early days, almost nobody took it seriously. The idea seemed too strange to matter.\n\n\
             Then came the moment that changed everything. A result nobody could explain away.\n\n\
             Suddenly, {topic} was impossible to ignore.\n\n\
             What followed was a rush of new questions, new experiments, and new arguments.\n\n\
             Some of those arguments are still going on today.\n\n\
             So the next time you come across {topic}, remember how unlikely its story really is.\n\n\
             Subscribe for more stories like this one."
        ),
    ]
}

/// Default tags derived from the niche and topic
pub fn default_tags(request: &ContentRequest) -> Vec<String> {
    let niche = request.niche.replace('_', " ");
    let mut tags = vec![niche.clone(), request.topic.to_lowercase()];
    tags.extend(
        niche
            .split_whitespace()
            .chain(request.topic.split_whitespace())
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| w.chars().count() > 3),
    );
    tags.extend(["facts", "did you know", "explained"].map(String::from));
    tags
}

/// Stable index into a template list, so the same topic yields the same script
fn pick_index(topic: &str, len: usize) -> usize {
    let digest = Sha256::digest(topic.as_bytes());
    let n = u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ]);
    (n % len as u64) as usize
}

fn first_sentence(body: &str) -> String {
    let flat = body.replace('\n', " ");
    let sentence = flat
        .split_inclusive(['.', '!', '?'])
        .next()
        .unwrap_or(&flat)
        .trim()
        .to_string();
    if sentence.chars().count() > 150 {
        let cut: String = sentence.chars().take(147).collect();
        format!("{}...", cut)
    } else {
        sentence
    }
}

#[async_trait]
impl Backend<ContentRequest, Script> for TemplateBackend {
    fn name(&self) -> &str {
        "template"
    }

    async fn produce(&self, request: &ContentRequest) -> Result<Script, BackendError> {
        let topic = request.topic.trim();
        if topic.is_empty() {
            return Err(BackendError::Failed("topic is empty".to_string()));
        }

        let templates = if request.duration_secs <= SHORT_FORM_SECS {
            short_templates(topic)
        } else {
            long_templates(topic)
        };
        let body = templates[pick_index(topic, templates.len())].clone();

        let niche = request.niche.replace('_', " ");
        let description = format!(
            "{}\n\nA short {} video about {}.\n\nSubscribe for more.",
            first_sentence(&body),
            niche,
            topic
        );

        Ok(Script {
            title: format!("The Story of {}", topic),
            description,
            tags: default_tags(request),
            body,
        })
    }
}
