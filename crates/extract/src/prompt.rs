pub fn build_extraction_prompt(text: &str) -> String {
    format!(
        r#"Extract named entities about video games from the following text.

INSTRUCTIONS:
1. Identify companies that developed or published a game, the platforms it runs on, and its genres
2. Copy each entity exactly as it appears in the text
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "entities": [
    {{"text": "EntityText", "label": "Developer|Platform|Genre|Other"}}
  ]
}}

RULES:
- Label must be one of: Developer, Platform, Genre, Other
- Keep entities in the order they first appear
- Return an empty list when nothing matches
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{}

JSON OUTPUT:"#,
        text
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}
