//! Which patient a FHIR request addresses.
//!
//! Used by the patient-context scope check and by consent. Anything that
//! could reach more than one patient resolves to [`PatientTarget::Ambiguous`].

/// Patient addressed by a FHIR request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatientTarget {
    /// Nothing in the path or query names a patient.
    Unresolved,
    /// Exactly one patient.
    Patient(String),
    /// Several patients, or a filter that can't be pinned to one.
    Ambiguous,
}

impl PatientTarget {
    /// The single patient id, if there is one.
    #[must_use]
    pub fn patient_id(&self) -> Option<&str> {
        match self {
            Self::Patient(id) => Some(id),
            Self::Unresolved | Self::Ambiguous => None,
        }
    }
}

#[derive(Default)]
struct Targets {
    ids: Vec<String>,
    ambiguous: bool,
}

impl Targets {
    fn add(&mut self, id: &str) {
        if id.is_empty() || id.contains('/') || id.contains(':') {
            self.ambiguous = true;
        } else if !self.ids.iter().any(|known| known == id) {
            self.ids.push(id.to_string());
        }
    }

    fn finish(self) -> PatientTarget {
        match self.ids.as_slice() {
            _ if self.ambiguous => PatientTarget::Ambiguous,
            [] => PatientTarget::Unresolved,
            [id] => PatientTarget::Patient(id.clone()),
            _ => PatientTarget::Ambiguous,
        }
    }
}

/// Resolves the patient a request targets.
///
/// `path` is the decoded path relative to the FHIR base (`Patient/123`,
/// `Observation`, `Patient/123/Condition`, ...). Every `patient` and
/// `subject` search parameter counts, with or without the `:Patient`
/// modifier, as does `_id` on a Patient search. Repeated and comma-separated
/// values are all collected; more than one distinct id is ambiguous.
#[must_use]
pub fn resolve_patient_target(path: &str, query: Option<&str>) -> PatientTarget {
    let mut targets = Targets::default();

    let mut segments = path.trim_matches('/').split('/');
    let resource_type = segments.next().unwrap_or_default();
    let patient_search = resource_type == "Patient";
    let mut path_id = None;
    if patient_search
        && let Some(id) = segments.next()
        && !id.is_empty()
        && !id.starts_with('$')
        && !id.starts_with('_')
    {
        path_id = Some(id);
        targets.add(id);
    }

    let Some(query) = query else {
        return targets.finish();
    };

    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let (param, modifier) = match name.split_once(':') {
            Some((param, modifier)) => (param, Some(modifier)),
            None => (&*name, None),
        };

        if param.starts_with("patient.") || param.starts_with("subject.") || param == "_has" {
            targets.ambiguous = true;
            continue;
        }

        let is_id = patient_search && path_id.is_none() && param == "_id";
        if param != "patient" && param != "subject" && !is_id {
            continue;
        }

        match modifier {
            None | Some("Patient") => {}
            // a typed subject other than Patient names no patient
            Some(m) if param == "subject" && is_resource_type(m) => continue,
            Some(_) => {
                targets.ambiguous = true;
                continue;
            }
        }

        for raw in value.split(',').map(str::trim) {
            if raw.is_empty() {
                continue;
            }
            if let Some(id) = raw.strip_prefix("Patient/") {
                targets.add(id);
            } else if param == "subject" && !raw.contains("://") && raw.contains('/') {
                // Group/9, Device/4: not a patient
                continue;
            } else {
                targets.add(raw);
            }
        }
    }

    targets.finish()
}

fn is_resource_type(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}
