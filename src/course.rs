// Courses are managed elsewhere; only `is_active` matters to the ledger.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Course {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub is_active: bool,
}

impl Course {
    pub fn new(id: impl Into<String>, title: &str) -> Self {
        Self {
            id: id.into(),
            title: title.to_string(),
            is_active: true,
        }
    }
    pub fn set_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }
}
