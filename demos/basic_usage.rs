//! Basic usage example for the Spaces client
//!
//! Run with:
//! ```
//! cargo run --example basic_usage
//! ```

use dospaces::{FileUpload, SpacesClient, SpacesConfig, SpacesError};

#[tokio::main]
async fn main() -> Result<(), SpacesError> {
    let config = SpacesConfig::new(
        "https://my-space.nyc3.digitaloceanspaces.com",
        "YOUR_ACCESS_KEY",
        "YOUR_SECRET_KEY",
    )
    .with_region("nyc3");

    let client = SpacesClient::new(config);

    println!("DigitalOcean Spaces - Basic Usage Example");
    println!("=========================================\n");

    // Example 1: Upload a file (public-read, returns the public URL)
    println!("1. Uploading file...");
    let file = FileUpload::new(&b"Hello, Spaces!"[..], "hello.txt").with_content_type("text/plain");
    let url = client.upload("examples", &file, None).await?;
    println!("   Uploaded to: {}\n", url);

    // Example 2: Check it exists
    println!("2. Checking existence...");
    let present = client.exists("examples/hello.txt").await?;
    println!("   Exists: {}\n", present);

    // Example 3: Download it back
    println!("3. Downloading file...");
    let data = client.download("examples/hello.txt").await?;
    println!("   Downloaded {} bytes", data.len());
    println!("   Content: {}\n", String::from_utf8_lossy(&data));

    // Example 4: List keys under a prefix, following pagination
    println!("4. Listing keys with prefix 'examples/'...");
    let keys = client.list_all_keys(Some("examples/")).await?;
    println!("   Found {} keys:", keys.len());
    for key in keys.iter() {
        println!("   - {}", key);
    }
    println!();

    // Example 5: Delete the object
    println!("5. Deleting file...");
    client.delete("examples/hello.txt").await?;
    println!("   Deleted successfully");

    Ok(())
}
