//! Captura de referencias: el administrador envía un adjunto al bot y recibe
//! su referencia opaca para darla de alta a mano desde el panel. Nunca
//! escribe en el store.

use crate::models::FileRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Document,
    Video,
    Photo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub file_ref: FileRef,
    /// Las fotos no traen nombre.
    pub file_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CaptureAdapter {
    admin_id: Option<String>,
}

impl CaptureAdapter {
    pub fn new(admin_id: Option<String>) -> Self {
        Self { admin_id }
    }

    /// Texto de respuesta para el administrador, o `None` si el remitente no
    /// es el administrador configurado (se ignora en silencio).
    pub fn capture(&self, sender_id: &str, attachment: &Attachment) -> Option<String> {
        let admin_id = self.admin_id.as_deref()?;
        if sender_id != admin_id {
            return None;
        }

        // Un acento grave en el nombre cerraría el bloque de código del Markdown.
        let file_name = attachment
            .file_name
            .as_deref()
            .unwrap_or("Unknown")
            .replace('`', "'");
        Some(format!(
            "✅ *Fichero detectado*\n\n*Nombre:* `{file_name}`\n*File ID:* `{}`\n\nCopia este ID y añádelo desde el panel de administración.",
            attachment.file_ref
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(name: Option<&str>) -> Attachment {
        Attachment {
            kind: AttachmentKind::Document,
            file_ref: FileRef::new("BQACAgQAAxkBAAIB"),
            file_name: name.map(str::to_string),
        }
    }

    #[test]
    fn admin_gets_reference_and_filename() {
        let capture = CaptureAdapter::new(Some("1001".into()));
        let reply = capture.capture("1001", &document(Some("tema1.pdf"))).unwrap();
        assert!(reply.contains("`tema1.pdf`"));
        assert!(reply.contains("`BQACAgQAAxkBAAIB`"));
    }

    #[test]
    fn photos_without_name_are_labelled_unknown() {
        let capture = CaptureAdapter::new(Some("1001".into()));
        let photo = Attachment { kind: AttachmentKind::Photo, ..document(None) };
        assert!(capture.capture("1001", &photo).unwrap().contains("`Unknown`"));
    }

    #[test]
    fn backticks_in_filenames_cannot_break_the_code_span() {
        let capture = CaptureAdapter::new(Some("1001".into()));
        let reply = capture.capture("1001", &document(Some("tema`1`.pdf"))).unwrap();
        assert!(reply.contains("`tema'1'.pdf`"));
        assert_eq!(reply.matches('`').count(), 4);
    }

    #[test]
    fn other_senders_are_ignored() {
        let capture = CaptureAdapter::new(Some("1001".into()));
        assert_eq!(capture.capture("2002", &document(Some("x.pdf"))), None);
        let unconfigured = CaptureAdapter::new(None);
        assert_eq!(unconfigured.capture("1001", &document(Some("x.pdf"))), None);
    }
}
