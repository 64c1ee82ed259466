use crate::{Pulp3Client, Result, decode, resources::SigningService};

pub const BASE_URL: &str = "/signing-services/";

pub async fn get_all_signing_services(
  client: &Pulp3Client,
  params: Option<&[(String, String)]>,
) -> Result<Vec<SigningService>> {
  let results = client.get_page_results(BASE_URL, params).await?;
  results
    .into_iter()
    .map(|value| decode(BASE_URL, value))
    .collect()
}
