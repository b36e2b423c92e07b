use shared::{
    domain::{
        Commission, CommissionDraft, CommissionId, CommissionStatus, MessageId, MessageKind,
        UserId, UserProfile,
    },
    error::{ApiError, ErrorCode},
    pricing::compute_total,
    protocol::{CommissionListItem, MessagePayload, ServerEvent},
};
use shared::domain::CommissionOffer;
use storage::{CommissionRecord, Storage, StoredMessage};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn current_user(ctx: &ApiContext, user_id: UserId) -> Result<UserProfile, ApiError> {
    ensure_user(ctx, user_id).await
}

pub async fn list_offers(ctx: &ApiContext) -> Result<Vec<CommissionOffer>, ApiError> {
    ctx.storage.list_active_offers().await.map_err(internal)
}

/// Persists a draft, inserting or updating depending on whether the draft
/// carries an id. The total is always recomputed here; whatever the
/// client sent in `total_price` is ignored.
pub async fn save_draft(
    ctx: &ApiContext,
    user_id: UserId,
    draft: &CommissionDraft,
) -> Result<Commission, ApiError> {
    let user = ensure_user(ctx, user_id).await?;
    persist_draft(ctx, &user, draft, CommissionStatus::Draft).await
}

/// Finalizes a draft as a submitted commission and returns it. The client
/// navigates by the returned id.
pub async fn submit_commission(
    ctx: &ApiContext,
    user_id: UserId,
    draft: &CommissionDraft,
) -> Result<Commission, ApiError> {
    let user = ensure_user(ctx, user_id).await?;
    if draft.category.name.trim().is_empty() || draft.commission_type.name.trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "a commission path must be selected before submitting",
        ));
    }
    persist_draft(ctx, &user, draft, CommissionStatus::Submitted).await
}

async fn persist_draft(
    ctx: &ApiContext,
    user: &UserProfile,
    draft: &CommissionDraft,
    status: CommissionStatus,
) -> Result<Commission, ApiError> {
    let mut snapshot = draft.clone();
    snapshot.total_price = compute_total(&snapshot);
    snapshot.is_submitted = status != CommissionStatus::Draft;

    let record = CommissionRecord {
        user_id: user.id,
        offer_id: snapshot.offer_id,
        category_name: snapshot.category.name.clone(),
        type_name: snapshot.commission_type.name.clone(),
        subtype_name: snapshot.subtype.as_ref().map(|s| s.name.clone()),
        base_price: snapshot.base_price,
        character_count: snapshot.character_count,
        extra_character_price: snapshot.extra_character_price,
        usage_rights: snapshot.usage_rights,
        allow_streaming: snapshot.allow_streaming,
        comm_specific_inputs: snapshot.comm_specific_inputs.clone(),
        addons: snapshot.addons.clone(),
        reference_urls: snapshot.references.clone(),
        extra_info: if snapshot.extra_info.trim().is_empty() {
            None
        } else {
            Some(snapshot.extra_info.clone())
        },
        status,
        total_price: snapshot.total_price,
        form_snapshot: Some(snapshot.clone()),
    };

    let commission_id = match draft.id {
        Some(existing_id) => {
            let existing = ctx
                .storage
                .get_commission(existing_id)
                .await
                .map_err(internal)?
                .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "draft not found"))?;
            if existing.user_id != user.id {
                return Err(ApiError::new(ErrorCode::NotFound, "draft not found"));
            }
            if existing.status != CommissionStatus::Draft {
                return Err(ApiError::new(
                    ErrorCode::Validation,
                    "commission is no longer editable",
                ));
            }
            ctx.storage
                .update_commission(existing_id, &record)
                .await
                .map_err(internal)?;
            existing_id
        }
        None => ctx
            .storage
            .insert_commission(&record)
            .await
            .map_err(internal)?,
    };

    ctx.storage
        .get_commission(commission_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "commission vanished after write"))
}

/// Loads an editable draft's form snapshot. Only the owner sees it, and
/// only while the commission is still a draft.
pub async fn fetch_draft(
    ctx: &ApiContext,
    user_id: UserId,
    commission_id: CommissionId,
) -> Result<CommissionDraft, ApiError> {
    let user = ensure_user(ctx, user_id).await?;
    let mut commission = ctx
        .storage
        .get_commission(commission_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "draft not found"))?;
    if commission.user_id != user.id || commission.status != CommissionStatus::Draft {
        return Err(ApiError::new(ErrorCode::NotFound, "draft not found"));
    }

    let snapshot = commission.form_snapshot.take();
    let mut draft = snapshot.unwrap_or_else(|| draft_from_commission_fields(&commission));
    draft.id = Some(commission_id);
    Ok(draft)
}

// Older rows persisted before snapshots were stored still have to hydrate
// the wizard somehow.
fn draft_from_commission_fields(commission: &Commission) -> CommissionDraft {
    CommissionDraft {
        id: Some(commission.id),
        offer_id: commission.offer_id,
        category: shared::domain::PathChoice::named(commission.category_name.clone()),
        commission_type: shared::domain::PathChoice::named(commission.type_name.clone()),
        subtype: commission
            .subtype_name
            .clone()
            .map(shared::domain::PathChoice::named),
        base_price: commission.base_price,
        usage_rights: commission.usage_rights,
        allow_streaming: commission.allow_streaming,
        references: commission.reference_urls.clone(),
        extra_info: commission.extra_info.clone().unwrap_or_default(),
        character_count: commission.character_count,
        extra_character_price: commission.extra_character_price,
        max_character_count: None,
        comm_specific_inputs: commission.comm_specific_inputs.clone(),
        addons: commission.addons.clone(),
        total_price: commission.total_price,
        is_submitted: false,
    }
}

pub async fn list_commissions(
    ctx: &ApiContext,
    user_id: UserId,
) -> Result<Vec<Commission>, ApiError> {
    let user = ensure_user(ctx, user_id).await?;
    ctx.storage
        .list_commissions_for_user(user.id)
        .await
        .map_err(internal)
}

pub async fn list_all_commissions(
    ctx: &ApiContext,
    user_id: UserId,
) -> Result<Vec<CommissionListItem>, ApiError> {
    ensure_admin(ctx, user_id).await?;
    let rows = ctx.storage.list_all_commissions().await.map_err(internal)?;
    Ok(rows
        .into_iter()
        .map(|(commission, client_name)| CommissionListItem {
            commission,
            client_name,
        })
        .collect())
}

pub async fn get_commission(
    ctx: &ApiContext,
    user_id: UserId,
    commission_id: CommissionId,
) -> Result<Commission, ApiError> {
    let user = ensure_user(ctx, user_id).await?;
    ensure_commission_access(ctx, &user, commission_id).await
}

/// Moves a commission to a new workflow status. Admin only; owners only
/// ever change status implicitly by submitting a draft. Also appends a
/// status-update line to the commission's chat so the conversation
/// records the transition.
pub async fn update_status(
    ctx: &ApiContext,
    user_id: UserId,
    commission_id: CommissionId,
    status: CommissionStatus,
) -> Result<Vec<ServerEvent>, ApiError> {
    let admin = ensure_admin(ctx, user_id).await?;
    if status == CommissionStatus::Draft {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "a commission cannot be moved back to draft",
        ));
    }

    let updated = ctx
        .storage
        .update_status(commission_id, status)
        .await
        .map_err(internal)?;
    if !updated {
        return Err(ApiError::new(ErrorCode::NotFound, "commission not found"));
    }

    let note = ctx
        .storage
        .insert_message(
            commission_id,
            admin.id,
            MessageKind::StatusUpdate,
            Some(status.as_str()),
            None,
        )
        .await
        .map_err(internal)?;

    let commission = ctx
        .storage
        .get_commission(commission_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "commission vanished after write"))?;

    Ok(vec![
        ServerEvent::CommissionUpdated { commission },
        ServerEvent::MessageCreated {
            message: payload_from_stored(note, Some(admin.label().to_string())),
        },
    ])
}

pub async fn set_final_price(
    ctx: &ApiContext,
    user_id: UserId,
    commission_id: CommissionId,
    price: f64,
) -> Result<ServerEvent, ApiError> {
    ensure_admin(ctx, user_id).await?;
    if !price.is_finite() || price < 0.0 {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "final price must be a non-negative amount",
        ));
    }
    let updated = ctx
        .storage
        .set_final_price(commission_id, price)
        .await
        .map_err(internal)?;
    if !updated {
        return Err(ApiError::new(ErrorCode::NotFound, "commission not found"));
    }
    let commission = ctx
        .storage
        .get_commission(commission_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "commission vanished after write"))?;
    Ok(ServerEvent::CommissionUpdated { commission })
}

pub async fn send_message(
    ctx: &ApiContext,
    user_id: UserId,
    commission_id: CommissionId,
    kind: MessageKind,
    content: Option<&str>,
    file_url: Option<&str>,
) -> Result<ServerEvent, ApiError> {
    let user = ensure_user(ctx, user_id).await?;
    ensure_commission_access(ctx, &user, commission_id).await?;

    match kind {
        MessageKind::Text => {
            if content.map(str::trim).unwrap_or_default().is_empty() {
                return Err(ApiError::new(
                    ErrorCode::Validation,
                    "text messages need content",
                ));
            }
        }
        MessageKind::Image | MessageKind::File => {
            if file_url.map(str::trim).unwrap_or_default().is_empty() {
                return Err(ApiError::new(
                    ErrorCode::Validation,
                    "attachment messages need a file url",
                ));
            }
        }
        MessageKind::StatusUpdate => {
            return Err(ApiError::new(
                ErrorCode::Validation,
                "status updates are written by status changes",
            ));
        }
    }

    let stored = ctx
        .storage
        .insert_message(commission_id, user.id, kind, content, file_url)
        .await
        .map_err(internal)?;

    Ok(ServerEvent::MessageCreated {
        message: payload_from_stored(stored, Some(user.label().to_string())),
    })
}

pub async fn list_messages(
    ctx: &ApiContext,
    user_id: UserId,
    commission_id: CommissionId,
    limit: u32,
    before: Option<MessageId>,
) -> Result<Vec<MessagePayload>, ApiError> {
    let user = ensure_user(ctx, user_id).await?;
    ensure_commission_access(ctx, &user, commission_id).await?;

    let messages = ctx
        .storage
        .list_messages(commission_id, limit, before)
        .await
        .map_err(internal)?;

    let mut name_cache: std::collections::HashMap<UserId, Option<String>> =
        std::collections::HashMap::new();
    let mut payloads = Vec::with_capacity(messages.len());
    for message in messages {
        let sender_name = if let Some(cached) = name_cache.get(&message.sender_id) {
            cached.clone()
        } else {
            let resolved = ctx
                .storage
                .username_for_user(message.sender_id)
                .await
                .map_err(internal)?;
            name_cache.insert(message.sender_id, resolved.clone());
            resolved
        };
        payloads.push(payload_from_stored(message, sender_name));
    }
    Ok(payloads)
}

fn payload_from_stored(stored: StoredMessage, sender_name: Option<String>) -> MessagePayload {
    MessagePayload {
        message_id: stored.message_id,
        commission_id: stored.commission_id,
        sender_id: stored.sender_id,
        sender_name,
        kind: stored.kind,
        content: stored.content,
        file_url: stored.file_url,
        sent_at: stored.created_at,
    }
}

async fn ensure_user(ctx: &ApiContext, user_id: UserId) -> Result<UserProfile, ApiError> {
    ctx.storage
        .get_user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown user"))
}

async fn ensure_admin(ctx: &ApiContext, user_id: UserId) -> Result<UserProfile, ApiError> {
    let user = ensure_user(ctx, user_id).await?;
    if !user.is_admin {
        return Err(ApiError::new(ErrorCode::Forbidden, "admin access required"));
    }
    Ok(user)
}

/// Owner or admin; anyone else learns nothing beyond "not found".
async fn ensure_commission_access(
    ctx: &ApiContext,
    user: &UserProfile,
    commission_id: CommissionId,
) -> Result<Commission, ApiError> {
    let commission = ctx
        .storage
        .get_commission(commission_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "commission not found"))?;
    if commission.user_id != user.id && !user.is_admin {
        return Err(ApiError::new(ErrorCode::NotFound, "commission not found"));
    }
    Ok(commission)
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
