/// Context for one company's run through the pipeline
///
/// Carries the roster position for log prefixes so the interleaved output
/// of concurrent companies stays readable.
#[derive(Clone, Debug)]
pub struct CompanyCtx {
    /// 1-based position in the roster
    pub index: usize,
    pub company_id: String,
    pub company_name: String,
    pub tax_pin: String,
}

impl CompanyCtx {
    pub fn new(
        index: usize,
        company_id: impl Into<String>,
        company_name: impl Into<String>,
        tax_pin: impl Into<String>,
    ) -> Self {
        Self {
            index,
            company_id: company_id.into(),
            company_name: company_name.into(),
            tax_pin: tax_pin.into(),
        }
    }
}
