//! services/bot/src/bot/texts.rs
//!
//! User-facing strings and keyboards. Everything the bot says lives here so the
//! controller only deals with intents and stages.

use chrono::{DateTime, Utc};
use prezentor_core::catalog::TemplateVariant;
use prezentor_core::domain::{BalanceEntry, InlineButton, Keyboard, ReplyButton, User, UserStats};
use prezentor_core::PresentationData;

use crate::bot::protocol::CallbackAction;

/// Telegram rejects longer messages.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Reply-keyboard labels. `Intent::resolve` matches on these.
pub mod labels {
    pub const START_CREATING: &str = "✨ Yaratishni boshlash";
    pub const GUIDE: &str = "📖 Qo‘llanma";
    pub const TEMPLATES: &str = "📄 Shablonlar";
    pub const BALANCE: &str = "💰 Balans";
    pub const REFERRAL: &str = "📎 Referal link";
    pub const PRESENTATION: &str = "📊 Taqdimot";
    pub const INDEPENDENT_WORK: &str = "📚 Mustaqil ish";
    pub const ESSAY: &str = "📝 Referat";
    pub const BACK: &str = "🔙 Orqaga";
    pub const TOP_UP: &str = "Balansni to‘ldirish";
    pub const SEND_RECEIPT: &str = "Chekni yuborish";
    pub const SHARE_PHONE: &str = "Telefonni ulashish";

    pub const ADMIN_PANEL: &str = "🔧 Admin panel";
    pub const ADMIN_USERS: &str = "👥 Foydalanuvchilar ro‘yxati";
    pub const ADMIN_TOP_UP: &str = "💰 Balans qo‘shish";
    pub const ADMIN_HISTORY: &str = "📜 Balans tarixi";
    pub const ADMIN_STATS: &str = "📊 Statistika";
    pub const ADMIN_BROADCAST: &str = "📢 Hammaga xabar";
    pub const ADMIN_DIRECT: &str = "✉️ Foydalanuvchiga xabar";
}

// --- Registration ---
pub const ASK_FIRST_NAME: &str = "Iltimos, ismingizni kiriting";
pub const ASK_LAST_NAME: &str = "Familiyangizni kiriting:";
pub const FIRST_NAME_LENGTH: &str = "Ismingiz 2-50 harfdan iborat bo‘lishi kerak.";
pub const LAST_NAME_LENGTH: &str = "Familiyangiz 2-50 harfdan iborat bo‘lishi kerak.";
pub const ASK_PHONE: &str = "Telefon raqamingizni yuboring:";
pub const PHONE_VIA_CONTACT: &str = "Iltimos, telefon raqamingizni kontakt orqali yuboring:";
pub const FOREIGN_CONTACT: &str = "Iltimos, o‘zingizning telefon raqamingizni yuboring.";
pub const ASK_STUDENT: &str = "Siz o‘qiysizmi?";
pub const STUDENT_YES: &str = "Ha, o‘qiyman";
pub const STUDENT_NO: &str = "Yo‘q, o‘qimayman";

// --- Menus ---
pub const MAIN_MENU: &str = "📋 Asosiy menyu:";
pub const ADMIN_MENU: &str = "🔧 Admin panel:";
pub const CREATE_MENU: &str = "Nimani yaratmoqchisiz?";
pub const SUBSCRIBE: &str = "Botdan foydalanish uchun quyidagi kanallarga obuna bo‘ling:";
pub const NOT_AVAILABLE: &str = "Hozircha bu xizmat mavjud emas.";
pub const CHOOSE_FROM_MENU: &str = "Iltimos, menyudan kerakli bo‘limni tanlang.";
pub const STALE_BUTTON: &str = "Bu tugma endi faol emas. Iltimos, menyudan qaytadan boshlang.";
pub const GENERIC_ERROR: &str = "Xatolik yuz berdi, keyinroq urinib ko‘ring.";
pub const GUIDE_LINK: &str = "Qo‘llanmani ko‘rish uchun quyidagi havolaga o‘ting:";
pub const GUIDE_BUTTON: &str = "Qo‘llanma";
pub const TEMPLATES_LINK: &str = "Shablonlarni ko‘rish uchun quyidagi havolaga o‘ting:";
pub const TEMPLATES_BUTTON: &str = "Shablonlar";

// --- Presentation draft ---
pub const ASK_AUTHOR: &str = "Ism-familiyangizni kiriting:";
pub const ASK_INSTITUTION: &str = "O‘qiydigan muassasangizni kiriting:";
pub const ASK_TOPIC: &str = "Taqdimot mavzusini kiriting:";
pub const AUTHOR_LENGTH: &str = "Ism-familiya 3-100 belgidan iborat bo‘lishi kerak.";
pub const INSTITUTION_LENGTH: &str = "Muassasa nomi 2-150 belgidan iborat bo‘lishi kerak.";
pub const TOPIC_LENGTH: &str = "Mavzu 3-200 belgidan iborat bo‘lishi kerak.";
pub const CHOOSE_TEMPLATE: &str = "Qaysi shablon asosida taqdimot yaratmoqchisiz?";
pub const PREVIEW_BUTTON: &str = "👀 Shablonlarni ko‘rish";
pub const CONFIRM_NO: &str = "❌ Yo‘q";
pub const CONFIRM_YES: &str = "✅ Ha";
pub const CONFIRMATION_CANCELLED: &str =
    "❌ Tasdiqlash bekor qilindi. Qaytadan tanlang yoki /start bilan boshlang!";

// --- Generation ---
pub const GENERATION_STARTING: &str = "Taqdimot yaratish boshlanmoqda...";
pub const GENERATION_BUSY: &str = "⏳ Taqdimotingiz tayyorlanmoqda, iltimos kuting.";
pub const PRESENTATION_READY: &str = "✅ Prezentatsiya tayyor! Yuklab olishingiz mumkin!\n\n\
📌 Eslatma: Taqdimot telefonda ochilganda yozuvlar ustma-ust tushib qolishi mumkin. \
Shu sababli, kompyuterda ochib ko‘rishingiz tavsiya etiladi. 😊";
pub const GENERATION_FAILED: &str = "❌ Prezentatsiya yaratishda xatolik yuz berdi. \
Iltimos, qaytadan urinib ko‘ring yoki admin bilan bog‘laning.";

// --- Payments ---
pub const ASK_RECEIPT: &str = "Iltimos, to‘lov chekining skrinshotini yuboring:";
pub const RECEIPT_SENT: &str = "Chek adminga yuborildi. Tasdiqlanishini kuting.";

// --- Admin ---
pub const ASK_USER_ID: &str = "Foydalanuvchi ID’sini kiriting:";
pub const USER_NOT_FOUND: &str = "Bunday foydalanuvchi topilmadi.";
pub const ASK_AMOUNT: &str = "Qo‘shmoqchi bo‘lgan balans miqdorini kiriting (so‘mda):";
pub const INVALID_AMOUNT: &str = "Iltimos, to‘g‘ri miqdorni kiriting.";
pub const NO_USERS: &str = "Foydalanuvchilar mavjud emas.";
pub const NO_HISTORY: &str = "Bu foydalanuvchining balans tarixi mavjud emas.";
pub const ASK_BROADCAST: &str = "Barcha foydalanuvchilarga yuboriladigan xabarni kiriting:";
pub const ASK_DIRECT: &str = "Foydalanuvchiga yuboriladigan xabarni kiriting:";
pub const EMPTY_MESSAGE: &str = "Xabar bo‘sh bo‘lmasligi kerak.";

//=========================================================================================
// Keyboards
//=========================================================================================

fn reply(rows: &[&[&str]]) -> Keyboard {
    Keyboard::Reply {
        rows: rows
            .iter()
            .map(|row| row.iter().map(|label| ReplyButton::text(*label)).collect())
            .collect(),
        one_time: false,
    }
}

pub fn main_menu() -> Keyboard {
    reply(&[
        &[labels::START_CREATING],
        &[labels::GUIDE, labels::TEMPLATES],
        &[labels::BALANCE, labels::REFERRAL],
    ])
}

pub fn admin_menu() -> Keyboard {
    reply(&[
        &[labels::ADMIN_USERS, labels::ADMIN_TOP_UP],
        &[labels::ADMIN_HISTORY, labels::ADMIN_STATS],
        &[labels::ADMIN_BROADCAST, labels::ADMIN_DIRECT],
        &[labels::BACK],
    ])
}

pub fn create_menu() -> Keyboard {
    reply(&[
        &[labels::PRESENTATION],
        &[labels::INDEPENDENT_WORK, labels::ESSAY],
        &[labels::BACK],
    ])
}

pub fn back_only() -> Keyboard {
    reply(&[&[labels::BACK]])
}

pub fn balance_menu() -> Keyboard {
    reply(&[&[labels::TOP_UP], &[labels::BACK]])
}

pub fn top_up_menu() -> Keyboard {
    reply(&[&[labels::SEND_RECEIPT], &[labels::BACK]])
}

pub fn contact_request() -> Keyboard {
    Keyboard::Reply {
        rows: vec![vec![ReplyButton::contact(labels::SHARE_PHONE)]],
        one_time: true,
    }
}

pub fn student_choice() -> Keyboard {
    Keyboard::Inline(vec![
        vec![InlineButton::callback(STUDENT_YES, CallbackAction::Student(true).token())],
        vec![InlineButton::callback(STUDENT_NO, CallbackAction::Student(false).token())],
    ])
}

/// URL buttons for the channels that have a public `@name`.
pub fn channels_keyboard(channels: &[String]) -> Keyboard {
    Keyboard::Inline(
        channels
            .iter()
            .filter_map(|channel| {
                let name = channel.strip_prefix('@')?;
                Some(vec![InlineButton::url(channel.clone(), format!("https://t.me/{}", name))])
            })
            .collect(),
    )
}

pub fn link_button(label: &str, url: &str) -> Keyboard {
    Keyboard::Inline(vec![vec![InlineButton::url(label, url)]])
}

/// Three template buttons per row, then the preview button.
pub fn template_picker(variants: &[TemplateVariant]) -> Keyboard {
    let mut rows: Vec<Vec<InlineButton>> = variants
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .map(|v| InlineButton::callback(format!("{} · {} so‘m", v.id, v.price), CallbackAction::Template(v.id).token()))
                .collect()
        })
        .collect();
    rows.push(vec![InlineButton::callback(PREVIEW_BUTTON, CallbackAction::Preview(0).token())]);
    Keyboard::Inline(rows)
}

/// Paging controls under a preview photo. Paging wraps around the catalog.
pub fn preview_keyboard(index: usize, variant: &TemplateVariant, total: usize) -> Keyboard {
    let previous = (index + total - 1) % total;
    let next = (index + 1) % total;
    Keyboard::Inline(vec![
        vec![
            InlineButton::callback("⬅️", CallbackAction::Preview(previous).token()),
            InlineButton::callback(format!("{}/{}", index + 1, total), CallbackAction::Preview(index).token()),
            InlineButton::callback("➡️", CallbackAction::Preview(next).token()),
        ],
        vec![InlineButton::callback(
            format!("✅ {}-shablonni tanlash", variant.id),
            CallbackAction::Template(variant.id).token(),
        )],
    ])
}

pub fn confirm_keyboard() -> Keyboard {
    Keyboard::Inline(vec![vec![
        InlineButton::callback(CONFIRM_NO, CallbackAction::Confirm(false).token()),
        InlineButton::callback(CONFIRM_YES, CallbackAction::Confirm(true).token()),
    ]])
}

//=========================================================================================
// Formatted Messages
//=========================================================================================

pub fn registration_complete(bonus: i64) -> String {
    format!(
        "🎉 Ro‘yxatdan o‘tish muvaffaqiyatli yakunlandi! Sizga birinchi foydalanish uchun {} so‘m bonus berildi!",
        bonus
    )
}

pub fn balance(amount: i64) -> String {
    format!(
        "💰 Balansingiz: {} so‘m\n\
         🔹 Xizmatlardan uzluksiz foydalanish uchun balansingiz yetarli ekanligiga ishonch hosil qiling.\n\
         📌 Balansni to‘ldirish uchun pastdagi tugmani bosing! 🚀",
        amount
    )
}

pub fn referral_link(bot_username: &str, user: &str, bonus: i64) -> String {
    format!(
        "📎 Sizning referal linkingiz: \nhttps://t.me/{}?start={}\n\n\
         Do‘stlaringizni taklif qiling va har bir yangi foydalanuvchi uchun {} so‘m bonus oling!",
        bot_username, user, bonus
    )
}

pub fn referral_reward(bonus: i64) -> String {
    format!(
        "🎉 Sizning referal linkingiz orqali yangi foydalanuvchi ro‘yxatdan o‘tdi! Sizga {} so‘m bonus qo‘shildi.",
        bonus
    )
}

pub fn top_up_instructions(payment_details: &str) -> String {
    format!(
        "📌 Balansni to‘ldirish\n\n\
         💰 Xizmat narxlari har xil bo‘lib, har bir shablon uchun alohida belgilanadi.\n\n{}\n\n\
         📤 To‘lovni amalga oshirgandan so‘ng, chekni skrinshot qilib yuboring.",
        payment_details
    )
}

pub fn receipt_caption(username: Option<&str>, user: &str) -> String {
    format!("Foydalanuvchi: @{}, ID: {}", username.unwrap_or("Username yo‘q"), user)
}

pub fn confirmation_summary(draft: &PresentationData, variant: &TemplateVariant) -> String {
    format!(
        "📋 Quyidagi ma'lumotlarni tasdiqlaysizmi?\n\n\
         👤 Ism-familiya: {}\n\
         🏫 Muassasa: {}\n\
         📝 Mavzu: {}\n\
         📄 Tur: Taqdimot shablon {}\n\
         💰 Narx: {} so‘m\n\n\
         Tasdiqlash bilan balansingizdan {} so‘m yechiladi.",
        draft.author_name, draft.institution, draft.topic, variant.id, variant.price, variant.price
    )
}

pub fn insufficient_funds(balance: i64, price: i64) -> String {
    format!(
        "Balansingiz yetarli emas! Ushbu shablon narxi: {} so‘m\n💰 Hozirgi balansingiz: {} so‘m",
        price, balance
    )
}

pub fn preview_caption(variant: &TemplateVariant) -> String {
    format!(
        "📄 {}-shablon\n🗂 Slaydlar: {}\n💰 Narx: {} so‘m",
        variant.id,
        variant.slide_count(),
        variant.price
    )
}

/// `█` for every full ten percent, `░` for the rest.
pub fn progress_bar(percent: u8) -> String {
    let filled = usize::from(percent.min(100) / 10);
    format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled))
}

pub fn progress(stage: &str, percent: u8) -> String {
    format!("{}\n\n{} {}%", stage, progress_bar(percent), percent.min(100))
}

pub fn retrying(step: &str, attempt: u32, max_attempts: u32, percent: u8) -> String {
    format!(
        "{}\n🔄 Qayta urinilmoqda ({}/{})...\n\n{} {}%",
        step,
        attempt,
        max_attempts,
        progress_bar(percent),
        percent.min(100)
    )
}

pub fn archive_caption(user: &str, draft: &PresentationData, variant: &TemplateVariant) -> String {
    format!(
        "👤 {}\n🏫 {}\n📝 {}\n📄 Shablon {} · ID: {}",
        draft.author_name, draft.institution, draft.topic, variant.id, user
    )
}

pub fn top_up_done(user: &str, amount: i64) -> String {
    format!("{} foydalanuvchisiga {} so‘m qo‘shildi.", user, amount)
}

pub fn top_up_undelivered(user: &str, amount: i64) -> String {
    format!(
        "{} foydalanuvchisiga {} so‘m qo‘shildi, lekin unga xabar yuborib bo‘lmadi.",
        user, amount
    )
}

pub fn top_up_notice(amount: i64, balance: i64) -> String {
    format!(
        "🎉 Hurmatli foydalanuvchi! Admin tomonidan balansingizga {} so‘m qo‘shildi.\n\
         💰 Hozirgi balansingiz: {} so‘m",
        amount, balance
    )
}

pub fn user_list(users: &[User]) -> String {
    let lines: Vec<String> = users
        .iter()
        .map(|u| format!("ID: {}, Ism: {} {}, Balans: {} so‘m", u.id, u.first_name, u.last_name, u.balance))
        .collect();
    format!("👥 Foydalanuvchilar ro‘yxati:\n{}", lines.join("\n"))
}

fn date(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

pub fn history(user: &str, entries: &[BalanceEntry]) -> String {
    let lines: Vec<String> = entries
        .iter()
        .map(|e| {
            let bonus = if e.is_bonus { " (bonus)" } else { "" };
            format!("{:+} so‘m · {}{} · {}", e.amount, e.kind.as_str(), bonus, date(&e.created_at))
        })
        .collect();
    format!("📜 Balans tarixi (ID: {}):\n{}", user, lines.join("\n"))
}

pub fn stats(stats: &UserStats) -> String {
    format!(
        "📊 Statistika:\n\
         Jami foydalanuvchilar: {}\n\
         Umumiy balans: {} so‘m\n\
         Talabalar soni: {}\n\
         Yaratilgan taqdimotlar: {}",
        stats.total_users, stats.total_balance, stats.students, stats.presentations
    )
}

pub fn broadcast_report(sent: usize, failed: usize) -> String {
    format!("📢 Xabar {} ta foydalanuvchiga yuborildi. Yuborilmadi: {}.", sent, failed)
}

pub fn direct_report(user: &str, delivered: bool) -> String {
    if delivered {
        format!("✉️ Xabar {} foydalanuvchisiga yuborildi.", user)
    } else {
        format!("✉️ Xabarni {} foydalanuvchisiga yuborib bo‘lmadi.", user)
    }
}

/// Splits on line boundaries so that every part fits in one message.
/// A single line longer than `max_chars` is cut on character boundaries.
pub fn split_long(text: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let mut line: Vec<char> = line.chars().collect();
        while line.len() > max_chars {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = line.split_off(max_chars);
            parts.push(line.into_iter().collect());
            line = rest;
        }
        let needed = if current.is_empty() { line.len() } else { current_len + 1 + line.len() };
        if needed > max_chars {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current_len += line.len();
        current.extend(line);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use prezentor_core::catalog;

    #[test]
    fn progress_bar_fills_per_ten_percent() {
        assert_eq!(progress_bar(0), "░░░░░░░░░░");
        assert_eq!(progress_bar(45), "████░░░░░░");
        assert_eq!(progress_bar(100), "██████████");
        assert_eq!(progress(GENERATION_STARTING, 0), "Taqdimot yaratish boshlanmoqda...\n\n░░░░░░░░░░ 0%");
    }

    #[test]
    fn long_texts_split_on_lines() {
        let text = (0..300).map(|i| format!("line number {:03}", i)).collect::<Vec<_>>().join("\n");
        let parts = split_long(&text, 100);
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|p| p.chars().count() <= 100));
        assert_eq!(parts.join("\n"), text);
    }

    #[test]
    fn oversized_line_is_cut() {
        let line = "x".repeat(250);
        let parts = split_long(&line, 100);
        assert_eq!(parts.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![100, 100, 50]);
    }

    #[test]
    fn picker_offers_every_template_and_a_preview() {
        let Keyboard::Inline(rows) = template_picker(catalog::catalog()) else {
            panic!("inline keyboard expected");
        };
        let buttons: usize = rows.iter().map(Vec::len).sum();
        assert_eq!(buttons, catalog::catalog().len() + 1);
    }

    #[test]
    fn preview_paging_wraps() {
        let variants = catalog::catalog();
        let Keyboard::Inline(rows) = preview_keyboard(0, &variants[0], variants.len()) else {
            panic!("inline keyboard expected");
        };
        let tokens: Vec<_> = rows[0]
            .iter()
            .map(|b| match &b.action {
                prezentor_core::domain::InlineAction::Callback(data) => data.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(tokens, vec![format!("pv:{}", variants.len() - 1), "pv:0".to_string(), "pv:1".to_string()]);
    }
}
