//! # Compiled Document Download
//!
//! `GET /forms/{formtype}/{formkey}/{version}/pdf` serves the stored build
//! of one version as an attachment named `<formkey>_v<version>.pdf`.

use crate::assembler::compiler::Compiler;
use crate::error::FormError;
use crate::lifecycle::LifecycleManager;
use actix_files::NamedFile;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::web;

pub(crate) async fn process<C: Compiler + 'static>(
    path: web::Path<(String, String, u32)>,
    manager: web::Data<LifecycleManager<C>>,
) -> Result<NamedFile, FormError> {
    let (_form_type, form_key, version) = path.into_inner();
    let (location, filename) = manager.document(&form_key, version)?;
    log::debug!("serving {} as {}", location.display(), filename);
    let file = NamedFile::open_async(&location).await?;
    Ok(file
        .set_content_type(mime_guess::mime::APPLICATION_PDF)
        .set_content_disposition(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(filename)],
        }))
}
