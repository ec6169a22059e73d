//! services/bot/src/bot/controller.rs
//!
//! The conversation state machine. Every inbound event of one user is handled
//! here, in order, while holding that user's session lock.
//!
//! Errors from the ports propagate up to `handle`, which logs them, puts the
//! session back to `Idle` and sends the user a generic notice (throttled).

use futures::future::join_all;
use prezentor_core::catalog;
use prezentor_core::domain::{ChatId, Keyboard, NewUser, PhotoSource, TemplateId, User, UserId};
use prezentor_core::ports::PortError;
use prezentor_core::PresentationData;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::bot::protocol::{CallbackAction, EventKind, InboundEvent, Intent};
use crate::bot::state::{AppState, Drafting, Preview, Registering, Session, Stage};
use crate::bot::{admin, generation, referral, texts};
use crate::error::BotError;

const NAME_CHARS: (usize, usize) = (2, 50);
const AUTHOR_CHARS: (usize, usize) = (3, 100);
const INSTITUTION_CHARS: (usize, usize) = (2, 150);
const TOPIC_CHARS: (usize, usize) = (3, 200);

/// The entry point for one inbound event.
pub async fn handle(state: &Arc<AppState>, event: InboundEvent) {
    if let EventKind::Callback { id, .. } = &event.kind {
        if let Err(e) = state.messaging.acknowledge(id).await {
            debug!(user = %event.user, "Callback acknowledgement failed: {}", e);
        }
    }

    let session = state.sessions.get(&event.user).await;
    let mut session = session.lock().await;
    let before = session.stage.name();

    if let Err(e) = process(state, &mut session, &event).await {
        error!(user = %event.user, stage = before, "Failed to handle event: {}", e);
        if !matches!(session.stage, Stage::Generating { .. }) {
            session.stage = Stage::Idle;
        }
        if state.throttle.should_notify(&event.user).await {
            let (_, keyboard) = home(state, &event.user);
            if let Err(e) = state
                .messaging
                .send_text(&ChatId::from(&event.user), texts::GENERIC_ERROR, keyboard)
                .await
            {
                warn!(user = %event.user, "Could not send the error notice: {}", e);
            }
        }
        return;
    }

    if session.stage.name() != before {
        debug!(user = %event.user, from = before, to = session.stage.name(), "Stage changed");
    }
}

async fn process(state: &Arc<AppState>, session: &mut Session, event: &InboundEvent) -> Result<(), BotError> {
    let chat = ChatId::from(&event.user);

    if let Stage::Generating { .. } = session.stage {
        state.messaging.send_text(&chat, texts::GENERATION_BUSY, Keyboard::None).await?;
        return Ok(());
    }

    if let EventKind::Start { payload } = &event.kind {
        return start(state, session, &event.user, payload.as_deref()).await;
    }

    if let Stage::Registering(step) = session.stage.clone() {
        return registration(state, session, event, step).await;
    }

    let Some(user) = state.users.find_user(&event.user).await? else {
        return start(state, session, &event.user, None).await;
    };

    match &event.kind {
        EventKind::Text(intent) => text(state, session, &user, intent).await,
        EventKind::Photo { file_id, .. } => photo(state, session, &user, event.username.as_deref(), file_id).await,
        EventKind::Callback { action, .. } => callback(state, session, &user, action).await,
        EventKind::Contact { .. } | EventKind::Start { .. } => {
            let (_, keyboard) = home(state, &user.id);
            state.messaging.send_text(&chat, texts::CHOOSE_FROM_MENU, keyboard).await?;
            Ok(())
        }
    }
}

//=========================================================================================
// Start, Gate and Home
//=========================================================================================

async fn start(
    state: &AppState,
    session: &mut Session,
    user: &UserId,
    payload: Option<&str>,
) -> Result<(), BotError> {
    session.stage = Stage::Idle;
    if state.users.find_user(user).await?.is_none() {
        info!(%user, referral = payload.is_some(), "New user, starting registration");
        session.stage = Stage::Registering(Registering::FirstName {
            referrer: payload.map(str::to_string),
        });
        state
            .messaging
            .send_text(&ChatId::from(user), texts::ASK_FIRST_NAME, Keyboard::Remove)
            .await?;
        return Ok(());
    }
    show_home(state, session, user).await
}

/// The menu text and keyboard for the user's role.
fn home(state: &AppState, user: &UserId) -> (&'static str, Keyboard) {
    if state.is_admin(user) {
        (texts::ADMIN_MENU, texts::admin_menu())
    } else {
        (texts::MAIN_MENU, texts::main_menu())
    }
}

/// Shows the menu if the subscription gate passes, the channel list otherwise.
async fn show_home(state: &AppState, session: &mut Session, user: &UserId) -> Result<(), BotError> {
    let chat = ChatId::from(user);
    if !passes_gate(state, session, user).await {
        state
            .messaging
            .send_text(&chat, texts::SUBSCRIBE, texts::channels_keyboard(&state.config.channels))
            .await?;
        return Ok(());
    }
    let (text, keyboard) = home(state, user);
    state.messaging.send_text(&chat, text, keyboard).await?;
    Ok(())
}

/// Membership in every required channel. A failed lookup counts as "not a
/// member". The one-time exemption is consumed here.
async fn passes_gate(state: &AppState, session: &mut Session, user: &UserId) -> bool {
    if session.gate_exempt {
        session.gate_exempt = false;
        return true;
    }
    let channels = &state.config.channels;
    let results = join_all(channels.iter().map(|channel| state.messaging.is_member(channel, user))).await;
    channels.iter().zip(results).all(|(channel, result)| match result {
        Ok(member) => member,
        Err(e) => {
            warn!(%user, %channel, "Membership check failed: {}", e);
            false
        }
    })
}

//=========================================================================================
// Registration
//=========================================================================================

fn length_ok(text: &str, (min, max): (usize, usize)) -> bool {
    (min..=max).contains(&text.chars().count())
}

async fn registration(
    state: &AppState,
    session: &mut Session,
    event: &InboundEvent,
    step: Registering,
) -> Result<(), BotError> {
    let chat = ChatId::from(&event.user);
    let messaging = &state.messaging;
    let free_text = match &event.kind {
        EventKind::Text(intent) => intent.as_text().map(str::trim),
        _ => None,
    };

    match step {
        Registering::FirstName { referrer } => match free_text {
            Some(name) if length_ok(name, NAME_CHARS) => {
                session.stage = Stage::Registering(Registering::LastName {
                    referrer,
                    first_name: name.to_string(),
                });
                messaging.send_text(&chat, texts::ASK_LAST_NAME, Keyboard::None).await?;
            }
            Some(_) => {
                messaging.send_text(&chat, texts::FIRST_NAME_LENGTH, Keyboard::None).await?;
            }
            None => {
                messaging.send_text(&chat, texts::ASK_FIRST_NAME, Keyboard::None).await?;
            }
        },
        Registering::LastName { referrer, first_name } => match free_text {
            Some(name) if length_ok(name, NAME_CHARS) => {
                session.stage = Stage::Registering(Registering::Phone {
                    referrer,
                    first_name,
                    last_name: name.to_string(),
                });
                messaging.send_text(&chat, texts::ASK_PHONE, texts::contact_request()).await?;
            }
            Some(_) => {
                messaging.send_text(&chat, texts::LAST_NAME_LENGTH, Keyboard::None).await?;
            }
            None => {
                messaging.send_text(&chat, texts::ASK_LAST_NAME, Keyboard::None).await?;
            }
        },
        Registering::Phone {
            referrer,
            first_name,
            last_name,
        } => {
            let EventKind::Contact { phone, owner } = &event.kind else {
                messaging.send_text(&chat, texts::PHONE_VIA_CONTACT, texts::contact_request()).await?;
                return Ok(());
            };
            if owner.as_ref().is_some_and(|owner| owner != &event.user) {
                messaging.send_text(&chat, texts::FOREIGN_CONTACT, texts::contact_request()).await?;
                return Ok(());
            }

            let referred_by = referral::resolve_referrer(state, referrer.as_deref(), &event.user).await?;
            let new_user = NewUser {
                id: event.user.clone(),
                first_name,
                last_name,
                phone: phone.clone(),
                referred_by,
            };
            match state.users.register_user(new_user, state.config.signup_bonus).await {
                Ok(user) => {
                    info!(user = %user.id, balance = user.balance, "User registered");
                    if let Some(referrer) = &user.referred_by {
                        referral::reward_referrer(state, referrer, &user.id).await;
                    }
                }
                Err(PortError::Conflict(reason)) => warn!(user = %event.user, "Already registered: {}", reason),
                Err(e) => return Err(e.into()),
            }

            session.stage = Stage::Registering(Registering::Student);
            messaging.send_text(&chat, texts::ASK_STUDENT, texts::student_choice()).await?;
        }
        Registering::Student => {
            let EventKind::Callback {
                action: CallbackAction::Student(is_student),
                ..
            } = &event.kind
            else {
                messaging.send_text(&chat, texts::ASK_STUDENT, texts::student_choice()).await?;
                return Ok(());
            };
            state.users.set_student(&event.user, *is_student).await?;
            session.stage = Stage::Idle;
            session.gate_exempt = true;
            info!(user = %event.user, is_student, "Registration complete");

            let (_, keyboard) = home(state, &event.user);
            messaging
                .send_text(&chat, &texts::registration_complete(state.config.signup_bonus), keyboard)
                .await?;
        }
    }
    Ok(())
}

//=========================================================================================
// Text Input
//=========================================================================================

async fn text(state: &Arc<AppState>, session: &mut Session, user: &User, intent: &Intent) -> Result<(), BotError> {
    let chat = ChatId::from(&user.id);
    let messaging = &state.messaging;

    if intent.is_admin_only() {
        if state.is_admin(&user.id) {
            return admin::handle_intent(state, session, &user.id, intent).await;
        }
        let (_, keyboard) = home(state, &user.id);
        messaging.send_text(&chat, texts::CHOOSE_FROM_MENU, keyboard).await?;
        return Ok(());
    }

    if let Intent::Free(text) = intent {
        return free_text(state, session, user, text).await;
    }

    // Any menu label leaves the current sub-flow.
    session.stage = Stage::Idle;
    match intent {
        Intent::Back => {
            let (text, keyboard) = home(state, &user.id);
            messaging.send_text(&chat, text, keyboard).await?;
        }
        Intent::StartCreating => {
            if passes_gate(state, session, &user.id).await {
                messaging.send_text(&chat, texts::CREATE_MENU, texts::create_menu()).await?;
            } else {
                messaging
                    .send_text(&chat, texts::SUBSCRIBE, texts::channels_keyboard(&state.config.channels))
                    .await?;
            }
        }
        Intent::Presentation => {
            if passes_gate(state, session, &user.id).await {
                session.stage = Stage::Drafting(Drafting::Author);
                messaging.send_text(&chat, texts::ASK_AUTHOR, texts::back_only()).await?;
            } else {
                messaging
                    .send_text(&chat, texts::SUBSCRIBE, texts::channels_keyboard(&state.config.channels))
                    .await?;
            }
        }
        Intent::IndependentWork | Intent::Essay => {
            messaging.send_text(&chat, texts::NOT_AVAILABLE, texts::back_only()).await?;
        }
        Intent::Guide => {
            link_or_unavailable(state, &chat, state.config.guide_url.as_deref(), texts::GUIDE_LINK, texts::GUIDE_BUTTON)
                .await?;
        }
        Intent::Templates => {
            link_or_unavailable(
                state,
                &chat,
                state.config.templates_url.as_deref(),
                texts::TEMPLATES_LINK,
                texts::TEMPLATES_BUTTON,
            )
            .await?;
        }
        Intent::Balance => {
            let balance = state.ledger.get_balance(&user.id).await?;
            messaging.send_text(&chat, &texts::balance(balance), texts::balance_menu()).await?;
        }
        Intent::Referral => {
            let link = texts::referral_link(&state.bot_username, user.id.as_str(), state.config.referral_bonus);
            messaging.send_text(&chat, &link, texts::back_only()).await?;
        }
        Intent::TopUp => {
            let instructions = texts::top_up_instructions(&state.config.payment_details);
            messaging.send_text(&chat, &instructions, texts::top_up_menu()).await?;
        }
        Intent::SendReceipt => {
            session.stage = Stage::AwaitingPaymentProof;
            messaging.send_text(&chat, texts::ASK_RECEIPT, texts::back_only()).await?;
        }
        _ => {
            let (_, keyboard) = home(state, &user.id);
            messaging.send_text(&chat, texts::CHOOSE_FROM_MENU, keyboard).await?;
        }
    }
    Ok(())
}

async fn link_or_unavailable(
    state: &AppState,
    chat: &ChatId,
    url: Option<&str>,
    prompt: &str,
    button: &str,
) -> Result<(), BotError> {
    match url {
        Some(url) => state.messaging.send_text(chat, prompt, texts::link_button(button, url)).await?,
        None => state.messaging.send_text(chat, texts::NOT_AVAILABLE, texts::back_only()).await?,
    };
    Ok(())
}

async fn free_text(state: &Arc<AppState>, session: &mut Session, user: &User, text: &str) -> Result<(), BotError> {
    let chat = ChatId::from(&user.id);
    let messaging = &state.messaging;

    match session.stage.clone() {
        Stage::Drafting(step) => drafting(state, session, &chat, step, text.trim()).await?,
        Stage::SelectingTemplate { .. } => {
            messaging
                .send_text(&chat, texts::CHOOSE_TEMPLATE, texts::template_picker(catalog::catalog()))
                .await?;
        }
        Stage::Confirming { draft, template } => {
            resend_summary(state, session, &chat, &draft, template).await?;
        }
        Stage::AwaitingPaymentProof => {
            messaging.send_text(&chat, texts::ASK_RECEIPT, texts::back_only()).await?;
        }
        Stage::Admin(step) if state.is_admin(&user.id) => {
            admin::handle_input(state, session, &user.id, step, text.trim()).await?;
        }
        _ => {
            session.stage = Stage::Idle;
            let (_, keyboard) = home(state, &user.id);
            messaging.send_text(&chat, texts::CHOOSE_FROM_MENU, keyboard).await?;
        }
    }
    Ok(())
}

async fn drafting(state: &AppState, session: &mut Session, chat: &ChatId, step: Drafting, text: &str) -> Result<(), BotError> {
    let messaging = &state.messaging;
    match step {
        Drafting::Author => {
            if !length_ok(text, AUTHOR_CHARS) {
                messaging.send_text(chat, texts::AUTHOR_LENGTH, Keyboard::None).await?;
                return Ok(());
            }
            session.stage = Stage::Drafting(Drafting::Institution {
                author_name: text.to_string(),
            });
            messaging.send_text(chat, texts::ASK_INSTITUTION, Keyboard::None).await?;
        }
        Drafting::Institution { author_name } => {
            if !length_ok(text, INSTITUTION_CHARS) {
                messaging.send_text(chat, texts::INSTITUTION_LENGTH, Keyboard::None).await?;
                return Ok(());
            }
            session.stage = Stage::Drafting(Drafting::Topic {
                author_name,
                institution: text.to_string(),
            });
            messaging.send_text(chat, texts::ASK_TOPIC, Keyboard::None).await?;
        }
        Drafting::Topic { author_name, institution } => {
            if !length_ok(text, TOPIC_CHARS) {
                messaging.send_text(chat, texts::TOPIC_LENGTH, Keyboard::None).await?;
                return Ok(());
            }
            session.stage = Stage::SelectingTemplate {
                draft: PresentationData {
                    author_name,
                    institution,
                    topic: text.to_string(),
                },
                preview: None,
            };
            messaging
                .send_text(chat, texts::CHOOSE_TEMPLATE, texts::template_picker(catalog::catalog()))
                .await?;
        }
    }
    Ok(())
}

async fn resend_summary(
    state: &AppState,
    session: &mut Session,
    chat: &ChatId,
    draft: &PresentationData,
    template: TemplateId,
) -> Result<(), BotError> {
    match catalog::find(template) {
        Some(variant) => {
            state
                .messaging
                .send_text(chat, &texts::confirmation_summary(draft, variant), texts::confirm_keyboard())
                .await?;
        }
        None => {
            session.stage = Stage::Idle;
            state.messaging.send_text(chat, texts::STALE_BUTTON, texts::main_menu()).await?;
        }
    }
    Ok(())
}

//=========================================================================================
// Photos and Buttons
//=========================================================================================

async fn photo(
    state: &AppState,
    session: &mut Session,
    user: &User,
    username: Option<&str>,
    file_id: &str,
) -> Result<(), BotError> {
    let chat = ChatId::from(&user.id);
    if session.stage != Stage::AwaitingPaymentProof {
        let (_, keyboard) = home(state, &user.id);
        state.messaging.send_text(&chat, texts::CHOOSE_FROM_MENU, keyboard).await?;
        return Ok(());
    }

    let operator = ChatId(state.config.admin_id.to_string());
    let caption = texts::receipt_caption(username, user.id.as_str());
    state
        .messaging
        .send_photo(&operator, &PhotoSource::Remote(file_id.to_string()), &caption, Keyboard::None)
        .await?;
    session.stage = Stage::Idle;
    info!(user = %user.id, "Payment receipt forwarded");
    state.messaging.send_text(&chat, texts::RECEIPT_SENT, texts::back_only()).await?;
    Ok(())
}

async fn callback(
    state: &Arc<AppState>,
    session: &mut Session,
    user: &User,
    action: &CallbackAction,
) -> Result<(), BotError> {
    let chat = ChatId::from(&user.id);
    let messaging = &state.messaging;

    match (session.stage.clone(), action) {
        (Stage::SelectingTemplate { draft, .. }, CallbackAction::Template(id)) => match catalog::find(*id) {
            Some(variant) => {
                session.stage = Stage::Confirming { draft: draft.clone(), template: *id };
                messaging
                    .send_text(&chat, &texts::confirmation_summary(&draft, variant), texts::confirm_keyboard())
                    .await?;
            }
            None => {
                messaging
                    .send_text(&chat, texts::CHOOSE_TEMPLATE, texts::template_picker(catalog::catalog()))
                    .await?;
            }
        },
        (Stage::SelectingTemplate { draft, preview }, CallbackAction::Preview(index)) => {
            show_preview(state, session, &chat, draft, preview, *index).await?;
        }
        (Stage::Confirming { .. }, CallbackAction::Confirm(false)) => {
            session.stage = Stage::Idle;
            info!(user = %user.id, "Confirmation declined");
            let (_, keyboard) = home(state, &user.id);
            messaging.send_text(&chat, texts::CONFIRMATION_CANCELLED, keyboard).await?;
        }
        (Stage::Confirming { draft, template }, CallbackAction::Confirm(true)) => match catalog::find(template) {
            Some(variant) => generation::begin(state, session, &user.id, draft, variant).await?,
            None => resend_summary(state, session, &chat, &draft, template).await?,
        },
        (stage, action) => {
            debug!(user = %user.id, stage = stage.name(), ?action, "Stale button");
            messaging.send_text(&chat, texts::STALE_BUTTON, Keyboard::None).await?;
        }
    }
    Ok(())
}

/// Shows template `index` in the preview photo, editing it in place when one
/// is already displayed. Requesting the index already shown does nothing.
async fn show_preview(
    state: &AppState,
    session: &mut Session,
    chat: &ChatId,
    draft: PresentationData,
    preview: Option<Preview>,
    index: usize,
) -> Result<(), BotError> {
    let variants = catalog::catalog();
    let index = index % variants.len();
    if preview.is_some_and(|shown| shown.index == index) {
        return Ok(());
    }

    let variant = &variants[index];
    let photo = PhotoSource::File(variant.preview_image(state.assembler.assets_dir()));
    let caption = texts::preview_caption(variant);
    let keyboard = texts::preview_keyboard(index, variant, variants.len());

    let message = match preview {
        Some(shown) => match state
            .messaging
            .edit_photo(chat, shown.message, &photo, &caption, keyboard.clone())
            .await
        {
            Ok(()) => shown.message,
            Err(e) => {
                warn!(%chat, "Editing the preview failed, sending a new one: {}", e);
                state.messaging.send_photo(chat, &photo, &caption, keyboard).await?
            }
        },
        None => state.messaging.send_photo(chat, &photo, &caption, keyboard).await?,
    };

    session.stage = Stage::SelectingTemplate {
        draft,
        preview: Some(Preview { index, message }),
    };
    Ok(())
}
