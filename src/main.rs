use mini_azure_openai::credentials::DefaultCredentialChain;
use mini_azure_openai::{Client, Embeddings, Error, DEFAULT_EMBEDDING_INPUT};

fn main() -> Result<(), Error> {
    let input = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_EMBEDDING_INPUT.to_string());

    let client = Client::new(Box::new(DefaultCredentialChain::new()))?;

    let request = Embeddings {
        input: vec![input].into(),
        ..Default::default()
    };

    let response = client.embeddings(&request)?;
    let first = response.first_embedding()?;

    println!("{:?}", first.embedding);

    Ok(())
}
