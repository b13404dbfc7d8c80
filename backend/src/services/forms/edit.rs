//! `GET /forms/{formtype}/{formkey}/{version}/edit`: the data behind the
//! edit page of one version.

use crate::assembler::compiler::Compiler;
use crate::error::FormError;
use crate::lifecycle::LifecycleManager;
use actix_web::{web, HttpResponse};

pub(crate) async fn process<C: Compiler + 'static>(
    path: web::Path<(String, String, String)>,
    manager: web::Data<LifecycleManager<C>>,
) -> Result<HttpResponse, FormError> {
    let (form_type, form_key, version) = path.into_inner();
    // "latest" or anything else that is not a number means the last version
    let version = version.parse::<u32>().ok();
    let view = manager.edit_view(&form_type, &form_key, version)?;
    Ok(HttpResponse::Ok().json(view))
}
