use crate::assembler::compiler::Compiler;
use crate::error::FormError;
use crate::lifecycle::LifecycleManager;
use actix_web::{web, HttpResponse};
use common::responses::FormListing;

/// `GET /forms`: the form types a new form can be created from and every
/// stored form, sorted by key.
pub(crate) async fn process<C: Compiler + 'static>(
    manager: web::Data<LifecycleManager<C>>,
) -> Result<HttpResponse, FormError> {
    Ok(HttpResponse::Ok().json(FormListing {
        formtypes: manager.form_types(),
        forms: manager.list_forms()?,
    }))
}
