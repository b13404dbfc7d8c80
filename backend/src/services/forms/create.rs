//! `POST /forms/{formtype}/create?name=`: stores a new form holding the
//! block defaults as its first draft. Nothing is assembled.

use crate::assembler::compiler::Compiler;
use crate::error::FormError;
use crate::lifecycle::LifecycleManager;
use actix_web::{web, HttpResponse};
use common::requests::CreateFormRequest;

pub(crate) async fn process<C: Compiler + 'static>(
    form_type: web::Path<String>,
    query: web::Query<CreateFormRequest>,
    manager: web::Data<LifecycleManager<C>>,
) -> Result<HttpResponse, FormError> {
    let outcome = manager
        .create_with_defaults(&form_type, &query.name)
        .await?;
    Ok(HttpResponse::Created().json(outcome))
}
