//! crates/prezentor_core/src/catalog.rs
//!
//! The fixed catalog of presentation templates. Each variant is pure data:
//! price, number of detail sections, a colour/font theme and a geometry table
//! naming where every text box of every section kind goes.

use std::path::{Path, PathBuf};

use crate::domain::{Align, TemplateId};

/// Slides every variant has besides its detail sections:
/// title, contents, introduction, triple, conclusion, closing.
pub const FIXED_SLIDES: usize = 6;

/// Outline entries listed on the table-of-contents slide.
pub const CONTENTS_ENTRIES: [usize; 5] = [0, 1, 3, 5, 7];

/// A text box position in inches on a 10 x 5.625 in slide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxSpec {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub font_size: u16,
    pub bold: bool,
    pub align: Align,
}

const fn boxed(x: f32, y: f32, w: f32, h: f32, font_size: u16, bold: bool, align: Align) -> BoxSpec {
    BoxSpec {
        x,
        y,
        w,
        h,
        font_size,
        bold,
        align,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TitleGeometry {
    pub topic: BoxSpec,
    pub author: BoxSpec,
    pub institution: BoxSpec,
}

/// Contents entries are stacked: entry `n` sits `n * step` inches below `first`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentsGeometry {
    pub first: BoxSpec,
    pub step: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntroGeometry {
    pub overview: BoxSpec,
    pub facts: [BoxSpec; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripleGeometry {
    pub heading: BoxSpec,
    pub columns: [BoxSpec; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetailGeometry {
    pub heading: BoxSpec,
    pub body: BoxSpec,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosingGeometry {
    pub author: BoxSpec,
    pub institution: BoxSpec,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutGeometry {
    pub title: TitleGeometry,
    pub contents: ContentsGeometry,
    pub intro: IntroGeometry,
    pub triple: TripleGeometry,
    pub detail: DetailGeometry,
    pub conclusion: BoxSpec,
    pub closing: ClosingGeometry,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Theme {
    /// Used for titles, names and the contents list.
    pub display_font: &'static str,
    /// Used for paragraphs.
    pub body_font: &'static str,
    pub title_color: &'static str,
    pub heading_color: &'static str,
    pub text_color: &'static str,
    /// The overview box on the introduction slide usually sits on a dark panel.
    pub overview_color: &'static str,
    pub uppercase_topic: bool,
    pub title_case_names: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateVariant {
    pub id: TemplateId,
    pub price: i64,
    pub detail_sections: usize,
    /// How many detail sections precede the triple-paragraph section.
    pub triple_position: usize,
    pub theme: Theme,
    pub geometry: &'static LayoutGeometry,
}

impl TemplateVariant {
    pub fn slide_count(&self) -> usize {
        FIXED_SLIDES + self.detail_sections
    }

    /// One background image per slide, in slide order.
    pub fn backgrounds(&self, assets_dir: &Path) -> Vec<PathBuf> {
        (1..=self.slide_count())
            .map(|n| assets_dir.join(self.id.0.to_string()).join(format!("{}.png", n)))
            .collect()
    }

    /// The image shown while the user pages through the catalog.
    pub fn preview_image(&self, assets_dir: &Path) -> PathBuf {
        assets_dir.join(self.id.0.to_string()).join("1.png")
    }
}

//=========================================================================================
// Geometry tables
//=========================================================================================

static CLASSIC: LayoutGeometry = LayoutGeometry {
    title: TitleGeometry {
        topic: boxed(0.8, 2.15, 5.9, 1.2, 36, true, Align::Left),
        author: boxed(1.45, 4.85, 4.5, 0.5, 18, true, Align::Left),
        institution: boxed(1.45, 0.6, 4.8, 0.5, 18, true, Align::Left),
    },
    contents: ContentsGeometry {
        first: boxed(4.5, 1.6, 5.0, 0.5, 22, true, Align::Left),
        step: 0.7,
    },
    intro: IntroGeometry {
        overview: boxed(0.1, 1.3, 3.59, 3.5, 17, false, Align::Left),
        facts: [
            boxed(5.06, 0.96, 4.74, 1.05, 17, false, Align::Left),
            boxed(5.06, 2.23, 4.74, 1.05, 17, false, Align::Left),
            boxed(5.06, 3.5, 4.74, 1.05, 17, false, Align::Left),
        ],
    },
    triple: TripleGeometry {
        heading: boxed(0.12, 0.07, 7.27, 0.7, 24, true, Align::Left),
        columns: [
            boxed(0.61, 2.04, 2.59, 3.11, 14, false, Align::Center),
            boxed(3.73, 2.04, 2.59, 3.11, 14, false, Align::Center),
            boxed(6.84, 2.04, 2.59, 3.11, 14, false, Align::Center),
        ],
    },
    detail: DetailGeometry {
        heading: boxed(1.48, 0.16, 7.27, 0.84, 24, true, Align::Center),
        body: boxed(0.99, 1.45, 8.3, 3.36, 18, false, Align::Justify),
    },
    conclusion: boxed(0.39, 1.3, 4.83, 3.35, 14, false, Align::Justify),
    closing: ClosingGeometry {
        author: boxed(1.45, 4.85, 4.5, 0.5, 18, true, Align::Left),
        institution: boxed(1.45, 0.6, 4.8, 0.5, 18, true, Align::Left),
    },
};

static BANNER: LayoutGeometry = LayoutGeometry {
    title: TitleGeometry {
        topic: boxed(0.8, 2.2, 5.9, 1.2, 36, true, Align::Left),
        author: boxed(1.7, 4.4, 4.5, 0.5, 18, true, Align::Left),
        institution: boxed(1.48, 0.6, 4.8, 0.5, 18, true, Align::Left),
    },
    contents: ContentsGeometry {
        first: boxed(4.8, 1.57, 4.5, 0.5, 18, true, Align::Left),
        step: 0.64,
    },
    intro: IntroGeometry {
        overview: boxed(0.3, 0.95, 3.5, 3.9, 16, false, Align::Left),
        facts: [
            boxed(4.6, 1.33, 4.5, 1.0, 15, false, Align::Left),
            boxed(4.6, 2.62, 4.5, 1.0, 15, false, Align::Left),
            boxed(4.6, 3.88, 4.5, 1.0, 15, false, Align::Left),
        ],
    },
    triple: TripleGeometry {
        heading: boxed(1.8, 0.65, 7.0, 0.6, 18, true, Align::Center),
        columns: [
            boxed(0.57, 2.53, 2.7, 2.6, 12, false, Align::Center),
            boxed(3.6, 2.16, 2.7, 2.6, 12, false, Align::Center),
            boxed(6.75, 2.16, 2.7, 2.6, 12, false, Align::Center),
        ],
    },
    detail: DetailGeometry {
        heading: boxed(0.5, 0.4, 9.0, 0.7, 22, true, Align::Center),
        body: boxed(1.55, 3.0, 7.0, 2.3, 16, false, Align::Center),
    },
    conclusion: boxed(0.3, 3.0, 5.0, 2.3, 14, false, Align::Center),
    closing: ClosingGeometry {
        author: boxed(1.45, 4.85, 4.5, 0.5, 18, true, Align::Left),
        institution: boxed(1.48, 0.6, 4.8, 0.5, 18, true, Align::Left),
    },
};

static SPLIT: LayoutGeometry = LayoutGeometry {
    title: TitleGeometry {
        topic: boxed(0.6, 1.9, 6.4, 1.4, 34, true, Align::Left),
        author: boxed(0.6, 4.6, 5.0, 0.5, 18, true, Align::Left),
        institution: boxed(0.6, 0.5, 6.0, 0.5, 18, true, Align::Left),
    },
    contents: ContentsGeometry {
        first: boxed(4.3, 1.45, 5.3, 0.55, 20, true, Align::Left),
        step: 0.72,
    },
    intro: IntroGeometry {
        overview: boxed(0.4, 1.1, 4.2, 3.8, 17, false, Align::Justify),
        facts: [
            boxed(5.1, 1.0, 4.5, 1.1, 15, false, Align::Left),
            boxed(5.1, 2.3, 4.5, 1.1, 15, false, Align::Left),
            boxed(5.1, 3.6, 4.5, 1.1, 15, false, Align::Left),
        ],
    },
    triple: TripleGeometry {
        heading: boxed(0.5, 0.3, 9.0, 0.8, 24, true, Align::Center),
        columns: [
            boxed(0.5, 1.8, 2.8, 3.3, 13, false, Align::Justify),
            boxed(3.6, 1.8, 2.8, 3.3, 13, false, Align::Justify),
            boxed(6.7, 1.8, 2.8, 3.3, 13, false, Align::Justify),
        ],
    },
    detail: DetailGeometry {
        heading: boxed(0.49, 0.1, 8.8, 0.84, 24, true, Align::Center),
        body: boxed(0.99, 1.45, 8.3, 3.5, 18, false, Align::Justify),
    },
    conclusion: boxed(4.6, 1.2, 5.0, 3.6, 15, false, Align::Justify),
    closing: ClosingGeometry {
        author: boxed(0.6, 4.6, 5.0, 0.5, 18, true, Align::Left),
        institution: boxed(0.6, 0.5, 6.0, 0.5, 18, true, Align::Left),
    },
};

//=========================================================================================
// Themes
//=========================================================================================

const DARK_ON_LIGHT: Theme = Theme {
    display_font: "Agency FB",
    body_font: "Times New Roman",
    title_color: "000000",
    heading_color: "FFFFFF",
    text_color: "000000",
    overview_color: "FFFFFF",
    uppercase_topic: false,
    title_case_names: false,
};

const LIGHT_ON_DARK: Theme = Theme {
    display_font: "Agency FB",
    body_font: "Times New Roman",
    title_color: "FFFFFF",
    heading_color: "FFFFFF",
    text_color: "FFFFFF",
    overview_color: "FFFFFF",
    uppercase_topic: true,
    title_case_names: true,
};

const MODERN: Theme = Theme {
    display_font: "Calibri Light",
    body_font: "Calibri",
    title_color: "1F2937",
    heading_color: "1F2937",
    text_color: "111827",
    overview_color: "FFFFFF",
    uppercase_topic: false,
    title_case_names: true,
};

//=========================================================================================
// The catalog
//=========================================================================================

static CATALOG: [TemplateVariant; 8] = [
    TemplateVariant {
        id: TemplateId(1),
        price: 8000,
        detail_sections: 6,
        triple_position: 0,
        theme: DARK_ON_LIGHT,
        geometry: &CLASSIC,
    },
    TemplateVariant {
        id: TemplateId(2),
        price: 6000,
        detail_sections: 5,
        triple_position: 0,
        theme: DARK_ON_LIGHT,
        geometry: &CLASSIC,
    },
    TemplateVariant {
        id: TemplateId(3),
        price: 10000,
        detail_sections: 7,
        triple_position: 2,
        theme: LIGHT_ON_DARK,
        geometry: &BANNER,
    },
    TemplateVariant {
        id: TemplateId(4),
        price: 6000,
        detail_sections: 6,
        triple_position: 1,
        theme: LIGHT_ON_DARK,
        geometry: &CLASSIC,
    },
    TemplateVariant {
        id: TemplateId(5),
        price: 8000,
        detail_sections: 5,
        triple_position: 2,
        theme: MODERN,
        geometry: &SPLIT,
    },
    TemplateVariant {
        id: TemplateId(6),
        price: 10000,
        detail_sections: 7,
        triple_position: 3,
        theme: LIGHT_ON_DARK,
        geometry: &BANNER,
    },
    TemplateVariant {
        id: TemplateId(7),
        price: 7000,
        detail_sections: 6,
        triple_position: 2,
        theme: MODERN,
        geometry: &SPLIT,
    },
    TemplateVariant {
        id: TemplateId(8),
        price: 12000,
        detail_sections: 7,
        triple_position: 1,
        theme: DARK_ON_LIGHT,
        geometry: &SPLIT,
    },
];

pub fn catalog() -> &'static [TemplateVariant] {
    &CATALOG
}

pub fn find(id: TemplateId) -> Option<&'static TemplateVariant> {
    CATALOG.iter().find(|variant| variant.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_ids_are_unique_and_sections_fit_the_outline() {
        let mut ids: Vec<u8> = catalog().iter().map(|v| v.id.0).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), catalog().len());

        for variant in catalog() {
            assert!((5..=7).contains(&variant.detail_sections), "variant {}", variant.id);
            assert!(variant.triple_position <= variant.detail_sections);
            assert!(variant.price > 0);
        }
    }

    #[test]
    fn backgrounds_follow_slide_count() {
        let variant = find(TemplateId(3)).unwrap();
        let paths = variant.backgrounds(Path::new("assets"));
        assert_eq!(paths.len(), 13);
        assert_eq!(paths[0], Path::new("assets/3/1.png"));
        assert_eq!(paths[12], Path::new("assets/3/13.png"));
    }

    #[test]
    fn unknown_template_is_absent() {
        assert!(find(TemplateId(42)).is_none());
    }
}
