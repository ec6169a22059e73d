//! crates/prezentor_core/src/assembler.rs
//!
//! Turns a topic and its generated texts into a rendered presentation.
//! The assembler walks a fixed section order, asking the `ContentGenerator`
//! for each piece of text, places the texts into the variant's geometry and
//! finally hands the resolved `SlideDeck` to a `DocumentRenderer`.

use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{BoxSpec, TemplateVariant, CONTENTS_ENTRIES};
use crate::content::{
    cleanup_text, ContentGenerator, GenerationError, RetryObserver, OUTLINE_FALLBACK,
    OUTLINE_LEN,
};
use crate::domain::{Artifact, Slide, SlideDeck, TextElement, UserId};
use crate::ports::{DocumentRenderer, PortError, PortResult};

/// Outline entries longer than this are cut.
pub const MAX_OUTLINE_ENTRY_CHARS: usize = 60;
/// Logical file names are capped to this many characters.
pub const MAX_FILE_NAME_CHARS: usize = 50;

const SLIDE_HEIGHT: f32 = 5.625;

static LEADING_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\d{1,2}\s*[.)]|[-*•])\s*").expect("valid regex"));

/// The identity fields collected from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationData {
    pub author_name: String,
    pub institution: String,
    pub topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("template asset is missing: {0}")]
    MissingAsset(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("rendering failed: {0}")]
    Render(#[from] PortError),
    #[error("file system error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives progress updates while a presentation is assembled.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, stage: &str, percent: u8) -> PortResult<()>;

    /// Called before a generation step is retried.
    async fn retrying(&self, step: &str, attempt: u32, max_attempts: u32, percent: u8) -> PortResult<()> {
        let _ = (step, attempt, max_attempts, percent);
        Ok(())
    }
}

/// Forwards retry notifications of one step to the progress sink.
struct RetryNotice<'a> {
    sink: &'a dyn ProgressSink,
    percent: u8,
}

#[async_trait]
impl<'a> RetryObserver for RetryNotice<'a> {
    async fn before_retry(&self, attempt: u32, max_attempts: u32, step: &str) -> PortResult<()> {
        self.sink.retrying(step, attempt, max_attempts, self.percent).await
    }
}

//=========================================================================================
// The Assembler
//=========================================================================================

pub struct DocumentAssembler {
    renderer: Arc<dyn DocumentRenderer>,
    assets_dir: PathBuf,
    output_dir: PathBuf,
    outline_attempts: u32,
}

impl DocumentAssembler {
    pub fn new(
        renderer: Arc<dyn DocumentRenderer>,
        assets_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        outline_attempts: u32,
    ) -> Self {
        Self {
            renderer,
            assets_dir: assets_dir.into(),
            output_dir: output_dir.into(),
            outline_attempts,
        }
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    pub async fn assemble(
        &self,
        variant: &TemplateVariant,
        data: &PresentationData,
        generator: &ContentGenerator,
        progress: &dyn ProgressSink,
        owner: &UserId,
    ) -> Result<Artifact, AssemblyError> {
        let backgrounds = variant.backgrounds(&self.assets_dir);
        for background in &backgrounds {
            if !tokio::fs::try_exists(background).await.unwrap_or(false) {
                return Err(AssemblyError::MissingAsset(background.display().to_string()));
            }
        }

        let pieces = self.generate_pieces(variant, data, generator, progress).await?;
        let deck = layout(variant, data, &pieces, &backgrounds);

        report(progress, "Fayl yaratilmoqda", 98).await;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let logical = safe_file_name(&format!("{}_{}", data.author_name, data.topic));
        let extension = self.renderer.extension();
        let path = self
            .output_dir
            .join(format!("{}_{}_{}.{}", owner, Uuid::new_v4(), logical, extension));

        if let Err(e) = self.renderer.render(&deck, &path).await {
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove partial file {}: {}", path.display(), remove_err);
                }
            }
            return Err(AssemblyError::Render(e));
        }

        report(progress, "Tayyor", 100).await;
        info!(template = %variant.id, slides = deck.slides.len(), "Presentation assembled");
        Ok(Artifact {
            path,
            file_name: format!("{}.{}", logical, extension),
        })
    }

    async fn generate_pieces(
        &self,
        variant: &TemplateVariant,
        data: &PresentationData,
        generator: &ContentGenerator,
        progress: &dyn ProgressSink,
    ) -> Result<Pieces, GenerationError> {
        let topic = data.topic.as_str();
        let attempts = generator.policy().max_attempts;

        report(progress, "Reja tuzilmoqda", 5).await;
        let notice = RetryNotice { sink: progress, percent: 5 };
        let raw_outline = generator
            .generate_segments(&outline_prompt(topic), OUTLINE_LEN, self.outline_attempts, "Reja", Some(&notice))
            .await?;
        let outline: Vec<String> = raw_outline
            .iter()
            .enumerate()
            .map(|(i, entry)| sanitize_outline_entry(entry, i))
            .collect();

        report(progress, "Kirish yozilmoqda", 40).await;
        let notice = RetryNotice { sink: progress, percent: 40 };
        let overview = generator.generate_text(&overview_prompt(topic), "Kirish", Some(&notice)).await?;
        let mut facts = Vec::with_capacity(3);
        for (n, ordinal) in ["BIRINCHI", "IKKINCHI", "UCHINCHI"].iter().enumerate() {
            let step = format!("Fikr {}", n + 1);
            let percent = 41 + n as u8;
            report(progress, &step, percent).await;
            let notice = RetryNotice { sink: progress, percent };
            facts.push(generator.generate_text(&fact_prompt(topic, ordinal), &step, Some(&notice)).await?);
        }

        let (triple_index, detail_indices) = section_indices(variant);

        let triple_heading = outline[triple_index].clone();
        report(progress, &triple_heading, 52).await;
        let notice = RetryNotice { sink: progress, percent: 52 };
        let raw_triple = generator
            .generate_segments(&triple_prompt(topic, &triple_heading), 3, attempts, &triple_heading, Some(&notice))
            .await?;
        let triple = into_array(raw_triple);

        let (min_words, max_words) = word_target(&variant.geometry.detail.body);
        let mut details = Vec::with_capacity(detail_indices.len());
        for (n, index) in detail_indices.iter().enumerate() {
            let heading = outline[*index].clone();
            let percent = 60 + (30 * n / detail_indices.len().max(1)) as u8;
            report(progress, &heading, percent).await;
            let notice = RetryNotice { sink: progress, percent };
            let body = generator
                .generate_text(&detail_prompt(topic, &heading, min_words, max_words), &heading, Some(&notice))
                .await?;
            details.push((heading, body));
        }

        report(progress, "Xulosa yozilmoqda", 95).await;
        let notice = RetryNotice { sink: progress, percent: 95 };
        let conclusion = generator.generate_text(&conclusion_prompt(topic), "Xulosa", Some(&notice)).await?;

        Ok(Pieces {
            outline,
            overview,
            facts: into_array(facts),
            triple_heading,
            triple,
            details,
            conclusion,
        })
    }
}

async fn report(progress: &dyn ProgressSink, stage: &str, percent: u8) {
    if let Err(e) = progress.report(stage, percent).await {
        warn!(stage, percent, "Progress update failed: {}", e);
    }
}

/// Every generated text of one presentation, in outline terms.
struct Pieces {
    outline: Vec<String>,
    overview: String,
    facts: [String; 3],
    triple_heading: String,
    triple: [String; 3],
    details: Vec<(String, String)>,
    conclusion: String,
}

fn into_array(mut parts: Vec<String>) -> [String; 3] {
    parts.resize(3, String::new());
    let mut iter = parts.into_iter();
    [
        iter.next().unwrap_or_default(),
        iter.next().unwrap_or_default(),
        iter.next().unwrap_or_default(),
    ]
}

/// Outline index of the triple section and of each detail section.
/// Sections draw from entries 1..=8; entry 9 heads the conclusion.
pub fn section_indices(variant: &TemplateVariant) -> (usize, Vec<usize>) {
    let triple = 1 + variant.triple_position.min(7);
    let details = (1..=8)
        .filter(|i| *i != triple)
        .take(variant.detail_sections)
        .collect();
    (triple, details)
}

//=========================================================================================
// Layout
//=========================================================================================

fn layout(
    variant: &TemplateVariant,
    data: &PresentationData,
    pieces: &Pieces,
    backgrounds: &[PathBuf],
) -> SlideDeck {
    let theme = &variant.theme;
    let geometry = variant.geometry;
    let display = theme.display_font;
    let body = theme.body_font;

    let topic = if theme.uppercase_topic {
        data.topic.to_uppercase()
    } else {
        data.topic.clone()
    };
    let (author, institution) = if theme.title_case_names {
        (title_case(&data.author_name), title_case(&data.institution))
    } else {
        (data.author_name.clone(), data.institution.clone())
    };

    let author_box = |spec: &BoxSpec| adapt(spec, &author, &[(30, 3, 1.4), (60, 5, 1.8)]);
    let institution_box = |spec: &BoxSpec| adapt(spec, &institution, &[(40, 3, 1.4), (80, 5, 1.8)]);

    let mut slides: Vec<Vec<TextElement>> = Vec::with_capacity(variant.slide_count());

    let title = &geometry.title;
    slides.push(vec![
        place(&adapt(&title.topic, &topic, &[(40, 6, 1.3), (70, 10, 1.6)]), &topic, display, theme.title_color),
        place(&author_box(&title.author), &author, display, theme.title_color),
        place(&institution_box(&title.institution), &institution, display, theme.title_color),
    ]);

    let contents = &geometry.contents;
    slides.push(
        CONTENTS_ENTRIES
            .iter()
            .enumerate()
            .map(|(row, entry)| {
                let mut spec = contents.first;
                spec.y += contents.step * row as f32;
                place(&spec, &pieces.outline[*entry], display, theme.title_color)
            })
            .collect(),
    );

    let intro = &geometry.intro;
    let mut intro_slide = vec![place(&intro.overview, &pieces.overview, body, theme.overview_color)];
    for (spec, fact) in intro.facts.iter().zip(pieces.facts.iter()) {
        intro_slide.push(place(spec, fact, display, theme.text_color));
    }
    slides.push(intro_slide);

    let triple = &geometry.triple;
    let mut triple_slide = vec![place(&triple.heading, &pieces.triple_heading, display, theme.heading_color)];
    for (spec, paragraph) in triple.columns.iter().zip(pieces.triple.iter()) {
        triple_slide.push(place(spec, paragraph, body, theme.text_color));
    }

    let detail = &geometry.detail;
    let mut detail_slides = pieces.details.iter().map(|(heading, text)| {
        vec![
            place(&detail.heading, heading, display, theme.heading_color),
            place(&detail.body, text, body, theme.text_color),
        ]
    });
    slides.extend(detail_slides.by_ref().take(variant.triple_position));
    slides.push(triple_slide);
    slides.extend(detail_slides);

    slides.push(vec![place(&geometry.conclusion, &pieces.conclusion, body, theme.text_color)]);

    let closing = &geometry.closing;
    slides.push(vec![
        place(&author_box(&closing.author), &author, display, theme.title_color),
        place(&institution_box(&closing.institution), &institution, display, theme.title_color),
    ]);

    SlideDeck {
        slides: slides
            .into_iter()
            .zip(backgrounds.iter())
            .map(|(elements, background)| Slide {
                background: background.clone(),
                elements,
            })
            .collect(),
    }
}

fn place(spec: &BoxSpec, text: &str, font_face: &str, color: &str) -> TextElement {
    TextElement {
        text: text.to_string(),
        x: spec.x,
        y: spec.y,
        w: spec.w,
        h: spec.h,
        font_size: spec.font_size,
        font_face: font_face.to_string(),
        color: color.to_string(),
        bold: spec.bold,
        align: spec.align,
    }
}

/// Shrinks the font and grows the box for long strings. `steps` holds
/// `(threshold in chars, font reduction, height factor)` in ascending order.
pub fn adapt(spec: &BoxSpec, text: &str, steps: &[(usize, u16, f32)]) -> BoxSpec {
    let length = text.chars().count();
    let mut adapted = *spec;
    if let Some((_, reduction, factor)) = steps.iter().rev().find(|(threshold, _, _)| length > *threshold) {
        adapted.font_size = spec.font_size.saturating_sub(*reduction).max(10);
        adapted.h = spec.h * factor;
        if adapted.y + adapted.h > SLIDE_HEIGHT {
            adapted.y = (SLIDE_HEIGHT - adapted.h).max(0.0);
        }
    }
    adapted
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Removes leftover numbering and caps the entry; empty entries fall back to
/// the generic outline entry at the same position.
pub fn sanitize_outline_entry(entry: &str, index: usize) -> String {
    let cleaned = cleanup_text(entry);
    let stripped = LEADING_MARKER.replace(&cleaned, "");
    let capped: String = stripped.trim().chars().take(MAX_OUTLINE_ENTRY_CHARS).collect();
    let capped = capped.trim().to_string();
    if capped.is_empty() {
        OUTLINE_FALLBACK[index % OUTLINE_LEN].to_string()
    } else {
        capped
    }
}

/// Replaces everything but ASCII letters and digits with `_`.
pub fn safe_file_name(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(MAX_FILE_NAME_CHARS)
        .collect()
}

/// Word range for a paragraph filling `spec`.
fn word_target(spec: &BoxSpec) -> (usize, usize) {
    let centre = (spec.w * spec.h * 4.0).round() as usize;
    (centre.saturating_sub(15).max(30), centre + 15)
}

//=========================================================================================
// Prompts
//=========================================================================================

fn outline_prompt(topic: &str) -> String {
    format!(
        "\"{topic}\" mavzusi bo'yicha prezentatsiya uchun FAQAT 10 ta reja sarlavhalarini yoz.\n\
         QAT'IY QOIDALAR:\n\
         1. Har bir sarlavha $ belgisi bilan ajratilsin\n\
         2. Sarlavhalar qisqa va aniq bo'lsin (2-4 so'z)\n\
         3. Hech qanday raqam, nuqta yoki qo'shimcha belgilar ishlatma\n\
         4. Faqat sarlavhalarni yoz, hech qanday tushuntirish berma\n\
         5. Birinchi sarlavha \"Kirish\", oxirgisi \"Xulosa\" bo'lsin\n\
         NAMUNA FORMAT:\n\
         Kirish$Tarix$Asosiy tushunchalar$Turlar$Amaliy qo'llanish$Afzalliklari$Kamchiliklari$Holat$Kelajak$Xulosa\n\
         ENDI \"{topic}\" uchun 10 ta sarlavha yoz:"
    )
}

fn overview_prompt(topic: &str) -> String {
    format!(
        "\"{topic}\" mavzusi uchun prezentatsiyaning KIRISH slaydi uchun matn yoz. \
         Matn mavzuni umumiy tanishtirishi kerak. QAT'IY TALABLAR: 40-50 so'z. \
         Faqat matnni o'zini yoz (sarlavhasiz, prefikssiz)."
    )
}

fn fact_prompt(topic: &str, ordinal: &str) -> String {
    format!(
        "\"{topic}\" mavzusi bo'yicha {ordinal} asosiy FAKT yoki G'OYAni yoz. \
         QAT'IY TALABLAR: 15-20 so'z. Faqat bitta jumlani yoz."
    )
}

fn triple_prompt(topic: &str, section: &str) -> String {
    format!(
        "Prezentatsiya slaydi uchun \"{topic}\" mavzusining \"{section}\" bo'limi uchun 3 ta ALOHIDA matn bloki yoz. \
         Har bir blok alohida g'oyani ifodalasin.\n\
         QAT'IY FORMAT: matn1$matn2$matn3\n\
         QAT'IY TALABLAR: Har bir matn bloki 30-40 so'z. $ belgisidan boshqa hech narsa qo'shma. Sarlavha, raqam yo'q."
    )
}

fn detail_prompt(topic: &str, section: &str, min_words: usize, max_words: usize) -> String {
    format!(
        "\"{topic}\" mavzusining \"{section}\" bo'limi uchun MUKAMMAL matn yoz.\n\n\
         TALABLAR:\n\
         - Aniq {min_words}-{max_words} so'z\n\
         - \"{section}\" ni to'liq qamrab olish\n\
         - Aniq va konkret ma'lumotlar\n\
         - Mantiqiy strukturada\n\
         - Faqat matn, hech qanday sarlavha yo'q\n\n\
         Matn:"
    )
}

fn conclusion_prompt(topic: &str) -> String {
    format!(
        "\"{topic}\" mavzusi bo'yicha prezentatsiyaning YAKUNIY XULOSA slaydi uchun matn yoz. \
         Matn barcha asosiy fikrlarni umumlashtirishi va mavzuning ahamiyatini ta'kidlashi kerak.\n\
         QAT'IY TALABLAR: Aniq 90-100 so'z. Faqat matnni o'zini yoz (sarlavhasiz, prefikssiz)."
    )
}
